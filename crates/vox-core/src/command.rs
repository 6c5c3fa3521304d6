//! Slash command parsing.
//!
//! Console commands are parsed from user input here; executing them against
//! the catalog and the player is up to the front end.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;


/// Errors that can occur during command parsing or execution.
#[derive( Debug, Error )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Parsed slash command.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Library commands
    Scan { path: PathBuf },
    Refresh,
    Programs,
    Files { program: i64 },
    Unassigned,
    Assign { file: i64, program: Option<i64> },

    // Playback commands
    Play { program: i64 },
    PlayFile { file: i64 },
    Toggle,
    Stop,
    Next,
    Prev,
    Seek { position: Duration },
    Status,

    // Other commands
    Help,
    Quit,
}


impl Command {
    /// Parses a command string, with or without the leading `/`.
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let input = input.strip_prefix( '/' ).unwrap_or( input );
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            // Library commands
            "scan" | "add" => {
                let path = args
                    .ok_or_else( || CommandError::MissingArgument( "directory".into() ) )?;
                Ok( Command::Scan { path: PathBuf::from( path ) } )
            }
            "refresh" | "rescan" => Ok( Command::Refresh ),
            "programs" | "ls" => Ok( Command::Programs ),
            "files" | "f" => Ok( Command::Files { program: parse_id( args, "program id" )? } ),
            "unassigned" | "loose" => Ok( Command::Unassigned ),
            "assign" => {
                let args = args
                    .ok_or_else( || CommandError::MissingArgument( "file id".into() ) )?;
                let ( file, program ) = args
                    .split_once( char::is_whitespace )
                    .ok_or_else( || CommandError::MissingArgument( "program id or 'none'".into() ) )?;
                let file = parse_id( Some( file ), "file id" )?;
                let program = match program.trim() {
                    "none" | "-" => None,
                    id => Some( parse_id( Some( id ), "program id" )? ),
                };
                Ok( Command::Assign { file, program } )
            }

            // Playback commands
            "play" | "p" => Ok( Command::Play { program: parse_id( args, "program id" )? } ),
            "playfile" | "pf" => Ok( Command::PlayFile { file: parse_id( args, "file id" )? } ),
            "toggle" | "pause" | "t" => Ok( Command::Toggle ),
            "stop" | "st" => Ok( Command::Stop ),
            "next" | "n" => Ok( Command::Next ),
            "prev" | "previous" | "pr" => Ok( Command::Prev ),
            "seek" | "sk" => {
                let time_str = args
                    .ok_or_else( || CommandError::MissingArgument( "time position".into() ) )?;
                let position = parse_time( time_str )?;
                Ok( Command::Seek { position } )
            }
            "status" | "s" => Ok( Command::Status ),

            "help" | "h" | "?" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }
}


fn parse_id( arg: Option<&str>, what: &str ) -> Result<i64, CommandError> {
    let arg = arg.ok_or_else( || CommandError::MissingArgument( what.into() ) )?;
    arg.parse()
        .map_err( |_| CommandError::InvalidArgument( format!( "Invalid {}: {}", what, arg ) ) )
}


/// Parses a time string like "1:02:30", "1:30" or "90" into a Duration.
pub fn parse_time( s: &str ) -> Result<Duration, CommandError> {
    let s = s.trim();
    let mut seconds: u64 = 0;

    for ( i, field ) in s.split( ':' ).enumerate() {
        if i > 2 {
            return Err( CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) );
        }
        let value: u64 = field.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) )?;
        if i > 0 && value >= 60 {
            return Err( CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) );
        }
        seconds = seconds * 60 + value;
    }

    Ok( Duration::from_secs( seconds ) )
}


/// Formats a duration as "M:SS", or "H:MM:SS" past the hour.
pub fn format_time( d: Duration ) -> String {
    let secs = d.as_secs();
    let ( h, m, s ) = ( secs / 3600, secs / 60 % 60, secs % 60 );
    if h > 0 {
        format!( "{}:{:02}:{:02}", h, m, s )
    } else {
        format!( "{}:{:02}", m, s )
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Library Commands:
  /scan <dir>              Scan a directory into the catalog
  /refresh                 Rescan every known folder
  /programs                List programs
  /files <program>         List a program's files
  /unassigned              List files without a program
  /assign <file> <program> Move a file to a program ('none' to unassign)

Playback Commands:
  /play <program>          Play a program from its resume point
  /playfile <file>         Play a single file
  /toggle                  Pause or resume
  /stop                    Stop playback
  /next                    Next track
  /prev                    Previous track
  /seek <time>             Seek to position (e.g., 1:30)
  /status                  Show what is playing

Other Commands:
  /help                    Show this help
  /quit                    Exit vox"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_scan() {
        let cmd = Command::parse( "/scan /books/Long Story" ).unwrap();
        assert_eq!( cmd, Command::Scan { path: PathBuf::from( "/books/Long Story" ) } );
    }


    #[test]
    fn test_parse_play() {
        assert_eq!( Command::parse( "play 7" ).unwrap(), Command::Play { program: 7 } );
        assert_eq!( Command::parse( "pf 12" ).unwrap(), Command::PlayFile { file: 12 } );
    }


    #[test]
    fn test_parse_assign() {
        assert_eq!(
            Command::parse( "assign 3 9" ).unwrap(),
            Command::Assign { file: 3, program: Some( 9 ) }
        );
        assert_eq!(
            Command::parse( "assign 3 none" ).unwrap(),
            Command::Assign { file: 3, program: None }
        );
        assert!( matches!( Command::parse( "assign 3" ), Err( CommandError::MissingArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "assign x 1" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_seek() {
        let cmd = Command::parse( "seek 1:30" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: Duration::from_secs( 90 ) } );
    }


    #[test]
    fn test_parse_seek_seconds() {
        let cmd = Command::parse( "seek 45" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: Duration::from_secs( 45 ) } );
    }


    #[test]
    fn test_parse_time_hours() {
        assert_eq!( parse_time( "1:02:03" ).unwrap(), Duration::from_secs( 3723 ) );
        assert!( parse_time( "1:75" ).is_err() );
        assert!( parse_time( "1:2:3:4" ).is_err() );
        assert!( parse_time( "" ).is_err() );
    }


    #[test]
    fn test_format_time() {
        assert_eq!( format_time( Duration::from_secs( 65 ) ), "1:05" );
        assert_eq!( format_time( Duration::from_secs( 3723 ) ), "1:02:03" );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "foobar" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        assert!( matches!( Command::parse( "scan" ), Err( CommandError::MissingArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "play" ), Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_help_lists_only_known_commands() {
        let names: Vec<_> = help_text()
            .lines()
            .filter_map( |line| line.trim_start().strip_prefix( '/' ) )
            .filter_map( |rest| rest.split_whitespace().next() )
            .collect();
        assert_eq!( names.len(), 16 );
        for name in names {
            let parsed = Command::parse( name );
            assert!( !matches!( parsed, Err( CommandError::Unknown( _ ) ) ), "{} is not a command", name );
        }
    }
}
