//! Catalog records
//!
//! Plain data types mirroring the `folder`, `program` and `file` tables.
//! "No program" and "no current file" are always `None`.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{ DateTime, Utc };


/// An indexed filesystem root the scanner tracks.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Folder {
    pub id: i64,
    pub path: PathBuf,
    pub last_scan: DateTime<Utc>,
}


/// A logical audiobook or podcast: files sharing an album title.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Program {
    pub id: i64,
    pub title: String,
    pub creator: String,
    pub url: String,
    pub current_file: Option<i64>,
}


/// A single cataloged audio track.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct File {
    pub id: i64,
    pub program_id: Option<i64>,
    pub folder_id: i64,
    pub path: PathBuf,
    /// Disc index
    pub ord1: u32,
    /// Track index
    pub ord2: u32,
    pub title: String,
    /// Resume offset, whole seconds
    pub position: Duration,
    pub last_played: DateTime<Utc>,
}


impl File {
    /// Title to show to the user, falling back to the file name.
    pub fn display_title( &self ) -> String {
        if !self.title.is_empty() {
            return self.title.clone();
        }
        self.path
            .file_name()
            .map( |n| n.to_string_lossy().into_owned() )
            .unwrap_or_else( || self.path.display().to_string() )
    }


    /// Playlist order: (ord1, ord2, title, path), ascending.
    pub fn play_order( &self, other: &Self ) -> Ordering {
        self.ord1.cmp( &other.ord1 )
            .then_with( || self.ord2.cmp( &other.ord2 ) )
            .then_with( || self.title.cmp( &other.title ) )
            .then_with( || self.path.as_os_str().cmp( other.path.as_os_str() ) )
    }
}


/// Converts a stored unix timestamp; out-of-range values collapse to the epoch.
pub(crate) fn from_unix( secs: i64 ) -> DateTime<Utc> {
    DateTime::from_timestamp( secs, 0 ).unwrap_or_default()
}


#[cfg( test )]
mod tests {
    use super::*;


    fn file( ord1: u32, ord2: u32, title: &str, path: &str ) -> File {
        File {
            id: 0,
            program_id: None,
            folder_id: 1,
            path: PathBuf::from( path ),
            ord1,
            ord2,
            title: title.to_string(),
            position: Duration::ZERO,
            last_played: DateTime::default(),
        }
    }


    #[test]
    fn test_play_order_keys() {
        let a = file( 1, 9, "z", "/z" );
        let b = file( 2, 1, "a", "/a" );
        assert_eq!( a.play_order( &b ), Ordering::Less );

        let c = file( 1, 1, "b", "/a" );
        let d = file( 1, 1, "a", "/b" );
        assert_eq!( c.play_order( &d ), Ordering::Greater );

        let e = file( 0, 0, "", "/music/01.mp3" );
        let f = file( 0, 0, "", "/music/02.mp3" );
        assert_eq!( e.play_order( &f ), Ordering::Less );
    }


    #[test]
    fn test_display_title_falls_back_to_file_name() {
        let f = file( 0, 0, "", "/books/ch01.mp3" );
        assert_eq!( f.display_title(), "ch01.mp3" );
        let g = file( 0, 0, "Chapter One", "/books/ch01.mp3" );
        assert_eq!( g.display_title(), "Chapter One" );
    }


    #[test]
    fn test_from_unix_epoch() {
        assert_eq!( from_unix( 0 ), DateTime::<Utc>::default() );
        assert_eq!( from_unix( 1_700_000_000 ).timestamp(), 1_700_000_000 );
    }
}
