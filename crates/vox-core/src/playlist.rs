//! Playlist of one program
//!
//! A transient, ordered view of a program's files with a cursor. Never
//! persisted; the player rebuilds it from the catalog on demand.

use crate::model::File;


/// Ordered files of a single program plus the index being played.
#[derive( Debug, Clone, Default )]
pub struct Playlist {
    files: Vec<File>,
    current_index: Option<usize>,
}


impl Playlist {
    /// Creates a new empty playlist.
    pub fn new() -> Self {
        Self::default()
    }


    /// Builds a playlist in (ord1, ord2, title, path) order.
    pub fn from_files( mut files: Vec<File> ) -> Self {
        files.sort_by( |a, b| a.play_order( b ) );
        Self { files, current_index: None }
    }


    /// Clears the playlist.
    pub fn clear( &mut self ) {
        self.files.clear();
        self.current_index = None;
    }


    /// Gets the current file.
    pub fn current( &self ) -> Option<&File> {
        self.current_index.and_then( |i| self.files.get( i ) )
    }


    /// Gets the current index.
    pub fn current_index( &self ) -> Option<usize> {
        self.current_index
    }


    /// Index after the current one, if there is one.
    pub fn next_index( &self ) -> Option<usize> {
        let next = self.current_index? + 1;
        ( next < self.files.len() ).then_some( next )
    }


    /// Index before the current one, if there is one.
    pub fn previous_index( &self ) -> Option<usize> {
        self.current_index?.checked_sub( 1 )
    }


    /// Moves the cursor; out-of-range indexes are refused.
    pub fn jump_to( &mut self, index: usize ) -> Option<&File> {
        if index < self.files.len() {
            self.current_index = Some( index );
            self.current()
        } else {
            None
        }
    }


    /// Finds a file by catalog id.
    pub fn position_of( &self, file_id: i64 ) -> Option<usize> {
        self.files.iter().position( |f| f.id == file_id )
    }


    /// Gets a file by index.
    pub fn get( &self, index: usize ) -> Option<&File> {
        self.files.get( index )
    }


    /// Gets all files in the playlist.
    pub fn files( &self ) -> &[File] {
        &self.files
    }


    /// Gets the number of files.
    pub fn len( &self ) -> usize {
        self.files.len()
    }


    /// Returns true if the playlist is empty.
    pub fn is_empty( &self ) -> bool {
        self.files.is_empty()
    }
}


#[cfg( test )]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use chrono::DateTime;

    use super::*;


    fn file( id: i64, ord1: u32, ord2: u32, title: &str ) -> File {
        File {
            id,
            program_id: Some( 1 ),
            folder_id: 1,
            path: PathBuf::from( format!( "/books/{id}.mp3" ) ),
            ord1,
            ord2,
            title: title.to_string(),
            position: Duration::ZERO,
            last_played: DateTime::default(),
        }
    }


    fn sample() -> Playlist {
        Playlist::from_files( vec![
            file( 1, 2, 1, "" ),
            file( 2, 1, 2, "" ),
            file( 3, 1, 1, "b" ),
            file( 4, 1, 1, "a" ),
        ])
    }


    #[test]
    fn test_from_files_sorts() {
        let ids: Vec<_> = sample().files().iter().map( |f| f.id ).collect();
        assert_eq!( ids, vec![ 4, 3, 2, 1 ] );
    }


    #[test]
    fn test_order_is_stable_across_rebuilds() {
        let once: Vec<_> = sample().files().to_vec();
        let mut shuffled = once.clone();
        shuffled.reverse();
        assert_eq!( Playlist::from_files( shuffled ).files(), &once[ .. ] );
    }


    #[test]
    fn test_boundaries() {
        let mut playlist = sample();
        assert_eq!( playlist.next_index(), None );

        playlist.jump_to( 0 );
        assert_eq!( playlist.previous_index(), None );
        assert_eq!( playlist.next_index(), Some( 1 ) );

        playlist.jump_to( 3 );
        assert_eq!( playlist.next_index(), None );
        assert_eq!( playlist.previous_index(), Some( 2 ) );

        assert!( playlist.jump_to( 4 ).is_none() );
        assert_eq!( playlist.current_index(), Some( 3 ) );
    }


    #[test]
    fn test_position_of() {
        let playlist = sample();
        assert_eq!( playlist.position_of( 2 ), Some( 2 ) );
        assert_eq!( playlist.position_of( 99 ), None );
    }


    #[test]
    fn test_clear() {
        let mut playlist = sample();
        playlist.jump_to( 1 );
        playlist.clear();
        assert!( playlist.is_empty() );
        assert!( playlist.current().is_none() );
    }
}
