//! Media engine boundary
//!
//! The player drives playback through the `MediaEngine` trait and learns about
//! end-of-stream and failures through `EngineEvent`s delivered on a channel
//! from the engine's own threads.

use std::path::{ Path, PathBuf };
use std::time::Duration;

use thiserror::Error;
use url::Url;


/// Errors reported synchronously by engine commands.
#[derive( Debug, Error )]
pub enum EngineError {
    #[error( "Invalid source URI: {0}" )]
    Uri( String ),

    #[error( "No source loaded" )]
    NoSource,

    #[error( "Failed to open source: {0}" )]
    Open( String ),

    #[error( "Audio output error: {0}" )]
    Output( String ),

    #[error( "Seek failed: {0}" )]
    Seek( String ),
}


/// Asynchronous notifications from the engine.
///
/// Each event names the source it concerns so a listener can drop events
/// that belong to a source it has already moved away from.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum EngineEvent {
    EndOfStream { uri: String },
    Error { uri: String, message: String },
}


/// Playback backend controlled by the player.
///
/// Commands must not block on playback itself. Calling `seek` after `load`
/// but before `play` sets the offset playback starts from.
pub trait MediaEngine: Send {
    fn load( &mut self, uri: &str ) -> Result<(), EngineError>;
    fn play( &mut self ) -> Result<(), EngineError>;
    fn pause( &mut self ) -> Result<(), EngineError>;
    fn stop( &mut self ) -> Result<(), EngineError>;
    fn seek( &mut self, offset: Duration ) -> Result<(), EngineError>;
    fn query_position( &self ) -> Option<Duration>;
    fn query_duration( &self ) -> Option<Duration>;
}


/// `file://` URI for a local path.
pub fn file_uri( path: &Path ) -> Result<String, EngineError> {
    Url::from_file_path( path )
        .map( String::from )
        .map_err( |_| EngineError::Uri( path.display().to_string() ) )
}


/// Local path named by a `file://` URI.
pub fn uri_to_path( uri: &str ) -> Result<PathBuf, EngineError> {
    Url::parse( uri )
        .ok()
        .filter( |u| u.scheme() == "file" )
        .and_then( |u| u.to_file_path().ok() )
        .ok_or_else( || EngineError::Uri( uri.to_string() ) )
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_uri_roundtrip_with_spaces() {
        let path = Path::new( "/books/Long Story/01 - Prologue.mp3" );
        let uri = file_uri( path ).unwrap();
        assert!( uri.starts_with( "file:///books/Long%20Story/" ) );
        assert_eq!( uri_to_path( &uri ).unwrap(), path );
    }


    #[test]
    fn test_relative_path_has_no_uri() {
        assert!( matches!( file_uri( Path::new( "a.mp3" ) ), Err( EngineError::Uri( _ ) ) ) );
    }


    #[test]
    fn test_non_file_uri_rejected() {
        assert!( uri_to_path( "http://example.com/a.mp3" ).is_err() );
        assert!( uri_to_path( "not a uri" ).is_err() );
    }
}
