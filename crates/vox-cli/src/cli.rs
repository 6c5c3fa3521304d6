//! Command-line argument parsing for Vox.

use std::path::PathBuf;

use clap::{ ArgAction, Parser };


/// Vox - A console audiobook and podcast player that remembers where you were.
#[derive( Parser, Debug )]
#[command( name = "vox" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Catalog database to use instead of the default.
    #[arg( long, value_name = "PATH" )]
    pub db: Option<PathBuf>,

    /// Directories to scan into the catalog on startup.
    #[arg( long, value_name = "DIR", num_args = 1.. )]
    pub scan: Vec<PathBuf>,

    /// Rescan every known folder on startup.
    #[arg( long )]
    pub refresh: bool,

    /// Program to start playing.
    #[arg( short, long, value_name = "PROGRAM" )]
    pub play: Option<i64>,

    /// More logging (-v debug, -vv trace).
    #[arg( short, long, action = ArgAction::Count )]
    pub verbose: u8,

    /// Only log errors.
    #[arg( short, long, conflicts_with = "verbose" )]
    pub quiet: bool,
}


impl Args {
    /// Log level implied by the flags, if any were given.
    pub fn log_level( &self ) -> Option<&'static str> {
        match ( self.quiet, self.verbose ) {
            ( true, _ ) => Some( "error" ),
            ( false, 0 ) => None,
            ( false, 1 ) => Some( "debug" ),
            ( false, _ ) => Some( "trace" ),
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from( [ "vox", "--db", "/tmp/v.db", "--scan", "/a", "/b", "-vv" ] ).unwrap();
        assert_eq!( args.db, Some( PathBuf::from( "/tmp/v.db" ) ) );
        assert_eq!( args.scan, vec![ PathBuf::from( "/a" ), PathBuf::from( "/b" ) ] );
        assert_eq!( args.log_level(), Some( "trace" ) );
    }


    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!( Args::try_parse_from( [ "vox", "-q", "-v" ] ).is_err() );
        let args = Args::try_parse_from( [ "vox", "-q" ] ).unwrap();
        assert_eq!( args.log_level(), Some( "error" ) );
    }
}
