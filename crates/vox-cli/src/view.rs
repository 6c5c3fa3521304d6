//! Console rendering of player notifications.

use std::io::{ self, Write };
use std::time::Duration;

use vox_core::command::format_time;
use vox_core::{ File, PlaybackState, PlayerView };


/// Prints status changes and messages to stdout.
pub struct ConsoleView;


impl ConsoleView {
    fn print( &self, line: &str ) {
        let mut out = io::stdout().lock();
        let _ = writeln!( out, "{}", line );
        let _ = out.flush();
    }
}


impl PlayerView for ConsoleView {
    fn status( &self, file: Option<&File>, state: PlaybackState ) {
        match file {
            Some( file ) => self.print( &format!( "[{}] {}", state.label(), file.display_title() ) ),
            None => self.print( &format!( "[{}]", state.label() ) ),
        }
    }


    fn message( &self, text: &str ) {
        self.print( text );
    }
}


/// "1:05 / 42:10", or just the position when the length is unknown.
pub fn progress( position: Duration, duration: Option<Duration> ) -> String {
    match duration {
        Some( duration ) => format!( "{} / {}", format_time( position ), format_time( duration ) ),
        None => format_time( position ),
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_progress() {
        assert_eq!( progress( Duration::from_secs( 65 ), Some( Duration::from_secs( 600 ) ) ), "1:05 / 10:00" );
        assert_eq!( progress( Duration::from_secs( 5 ), None ), "0:05" );
    }
}
