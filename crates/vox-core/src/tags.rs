//! Tag extraction
//!
//! Reads the handful of fields the scanner cares about. Every field has a
//! documented default so callers never need to check for presence.

use std::fs::File;
use std::path::Path;

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{ MetadataOptions, StandardTagKey, Tag };
use symphonia::core::probe::Hint;
use thiserror::Error;


/// Errors that can occur while reading tags.
#[derive( Debug, Error )]
pub enum TagError {
    #[error( "Failed to open file: {0}" )]
    Open( #[from] std::io::Error ),

    #[error( "Unsupported or corrupt file: {0}" )]
    Unsupported( String ),
}


/// Tag fields relevant to cataloging.
///
/// Defaults: empty strings, disc 0, track 0.
#[derive( Debug, Clone, Default, PartialEq, Eq )]
pub struct TagInfo {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub disc: u32,
    pub track: u32,
}


/// Source of per-file metadata.
pub trait TagReader: Send + Sync {
    fn read( &self, path: &Path ) -> Result<TagInfo, TagError>;
}


/// Tag reader backed by Symphonia's probe.
#[derive( Debug, Default, Clone, Copy )]
pub struct SymphoniaTagReader;


impl TagReader for SymphoniaTagReader {
    fn read( &self, path: &Path ) -> Result<TagInfo, TagError> {
        let file = File::open( path )?;
        let mss = MediaSourceStream::new( Box::new( file ), Default::default() );

        let mut hint = Hint::new();
        if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
            hint.with_extension( ext );
        }

        let mut probed = symphonia::default::get_probe()
            .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
            .map_err( |e| TagError::Unsupported( e.to_string() ) )?;

        let mut info = TagInfo::default();

        // Tags found ahead of the container (ID3v2 and friends) win over
        // those stored inside it.
        if let Some( log ) = probed.metadata.get() {
            if let Some( rev ) = log.current() {
                fill( &mut info, rev.tags() );
            }
        }
        if let Some( rev ) = probed.format.metadata().current() {
            fill( &mut info, rev.tags() );
        }

        Ok( info )
    }
}


fn fill( info: &mut TagInfo, tags: &[Tag] ) {
    for tag in tags {
        let Some( key ) = tag.std_key else { continue };
        let value = tag.value.to_string();
        let value = value.trim();

        match key {
            StandardTagKey::Artist if info.artist.is_empty() => info.artist = value.to_string(),
            StandardTagKey::Album if info.album.is_empty() => info.album = value.to_string(),
            StandardTagKey::TrackTitle if info.title.is_empty() => info.title = value.to_string(),
            StandardTagKey::DiscNumber if info.disc == 0 => info.disc = parse_index( value ),
            StandardTagKey::TrackNumber if info.track == 0 => info.track = parse_index( value ),
            _ => {}
        }
    }
}


/// Parses a disc or track number.
///
/// Accepts bare integers and "N/M" pairs by taking the first run of digits;
/// anything unparseable yields 0.
pub fn parse_index( raw: &str ) -> u32 {
    let digits: String = raw
        .chars()
        .skip_while( |c| !c.is_ascii_digit() )
        .take_while( |c| c.is_ascii_digit() )
        .collect();
    digits.parse().unwrap_or( 0 )
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_index_bare() {
        assert_eq!( parse_index( "7" ), 7 );
        assert_eq!( parse_index( " 03 " ), 3 );
    }


    #[test]
    fn test_parse_index_pair() {
        assert_eq!( parse_index( "3/12" ), 3 );
        assert_eq!( parse_index( "1 / 2" ), 1 );
    }


    #[test]
    fn test_parse_index_garbage() {
        assert_eq!( parse_index( "" ), 0 );
        assert_eq!( parse_index( "none" ), 0 );
        assert_eq!( parse_index( "99999999999999999999" ), 0 );
    }


    #[test]
    fn test_fill_keeps_first_value() {
        use symphonia::core::meta::Value;

        let tags = vec![
            Tag::new( Some( StandardTagKey::Album ), "TALB", Value::String( "Foo".into() ) ),
            Tag::new( Some( StandardTagKey::Album ), "album", Value::String( "Bar".into() ) ),
            Tag::new( Some( StandardTagKey::TrackNumber ), "TRCK", Value::String( "4/10".into() ) ),
            Tag::new( Some( StandardTagKey::DiscNumber ), "TPOS", Value::String( "2".into() ) ),
            Tag::new( None, "XXXX", Value::String( "ignored".into() ) ),
        ];

        let mut info = TagInfo::default();
        fill( &mut info, &tags );
        assert_eq!( info.album, "Foo" );
        assert_eq!( info.track, 4 );
        assert_eq!( info.disc, 2 );
        assert_eq!( info.artist, "" );
    }


    #[test]
    fn test_unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "broken.mp3" );
        std::fs::write( &path, b"definitely not audio" ).unwrap();
        assert!( SymphoniaTagReader.read( &path ).is_err() );
    }
}
