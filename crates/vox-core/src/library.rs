//! Library scanning
//!
//! Walks directory trees, catalogs every audio file it has not seen before and
//! files it under a program named after its album tag. Files already in the
//! catalog are never touched again, so rescans are cheap and preserve edits.

use std::collections::HashSet;
use std::path::{ Path, PathBuf };
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use thiserror::Error;
use walkdir::WalkDir;

use crate::catalog::{ Catalog, CatalogError };
use crate::model::{ File, Folder, Program };
use crate::tags::{ TagInfo, TagReader };


/// Supported audio file extensions, compared case-insensitively.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "ogg", "oga", "opus", "m4b", "aac", "flac",
];


/// Errors that abort a scan.
#[derive( Debug, Error )]
pub enum LibraryError {
    #[error( "IO error in {path}: {source}" )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error( "Path not found: {0}" )]
    NotFound( PathBuf ),

    #[error( "Catalog error: {0}" )]
    Catalog( #[from] CatalogError ),
}


/// What happened to a single audio file during a scan.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
enum Outcome {
    Added,
    Untagged,
    Known,
}


/// Running totals for one scan pass.
#[derive( Debug, Default, Clone, Copy )]
struct Tally {
    added: usize,
    untagged: usize,
    known: usize,
    failed: usize,
}


/// Catalogs audio files found below a set of folders.
pub struct Scanner {
    catalog: Catalog,
    tags: Arc<dyn TagReader>,
}


impl Scanner {
    /// Creates a scanner that owns its own catalog handle.
    pub fn new( catalog: Catalog, tags: Arc<dyn TagReader> ) -> Self {
        Self { catalog, tags }
    }


    /// Gives the catalog handle back.
    pub fn into_catalog( self ) -> Catalog {
        self.catalog
    }


    /// Scans one directory tree.
    ///
    /// Safe to re-run. A directory that cannot be read aborts the scan and
    /// leaves `last_scan` alone; files committed up to that point stay.
    /// Symlinks are resolved, so each physical file is cataloged once.
    pub fn scan( &self, root: &Path ) -> Result<Folder, LibraryError> {
        let root = std::fs::canonicalize( root ).map_err( |e| match e.kind() {
            std::io::ErrorKind::NotFound => LibraryError::NotFound( root.to_path_buf() ),
            _ => LibraryError::Io { path: root.to_path_buf(), source: e },
        })?;

        let mut folder = self.ensure_folder( &root )?;
        tracing::info!( "Scanning: {:?}", root );

        let mut tally = Tally::default();
        let mut visited = HashSet::new();
        self.scan_tree( &root, &folder, &mut visited, &mut tally )?;

        let now = Utc::now();
        self.catalog.folder_update_scan( folder.id, now )?;
        folder.last_scan = now;

        tracing::info!(
            "Scanned {:?}: {} added, {} without tags, {} already known, {} failed",
            root,
            tally.added,
            tally.untagged,
            tally.known,
            tally.failed
        );
        Ok( folder )
    }


    /// Rescans every known folder.
    ///
    /// A folder that fails is logged and skipped; the others still run.
    pub fn refresh( &self ) -> Result<Vec<Folder>, LibraryError> {
        let mut scanned = Vec::new();
        for folder in self.catalog.folder_get_all()? {
            match self.scan( &folder.path ) {
                Ok( f ) => scanned.push( f ),
                Err( e ) => tracing::error!( "Rescan of {:?} failed: {}", folder.path, e ),
            }
        }
        Ok( scanned )
    }


    fn ensure_folder( &self, root: &Path ) -> Result<Folder, LibraryError> {
        if let Some( folder ) = self.catalog.folder_get_by_path( root )? {
            return Ok( folder );
        }
        match self.catalog.folder_add( root ) {
            Ok( folder ) => Ok( folder ),
            // Another worker got there first.
            Err( CatalogError::Duplicate( _ ) ) => self.catalog
                .folder_get_by_path( root )?
                .ok_or_else( || LibraryError::NotFound( root.to_path_buf() ) ),
            Err( e ) => Err( e.into() ),
        }
    }


    /// Walks one tree without following symlinks; linked directories are
    /// entered through `follow_link`, once per canonical path.
    fn scan_tree(
        &self,
        top: &Path,
        folder: &Folder,
        visited: &mut HashSet<PathBuf>,
        tally: &mut Tally,
    ) -> Result<(), LibraryError> {
        for entry in WalkDir::new( top ).follow_links( false ).sort_by_file_name() {
            let entry = entry.map_err( |e| walk_error( top, e ) )?;
            let path = entry.path();
            let file_type = entry.file_type();

            if file_type.is_dir() {
                visited.insert( path.to_path_buf() );
            } else if file_type.is_symlink() {
                self.follow_link( path, folder, visited, tally )?;
            } else if is_audio_file( path ) {
                self.catalog_file( path, folder, tally );
            }
        }
        Ok(())
    }


    fn follow_link(
        &self,
        link: &Path,
        folder: &Folder,
        visited: &mut HashSet<PathBuf>,
        tally: &mut Tally,
    ) -> Result<(), LibraryError> {
        let target = match std::fs::canonicalize( link ) {
            Ok( target ) => target,
            Err( e ) => {
                tracing::warn!( "Skipping broken link {:?}: {}", link, e );
                return Ok(());
            }
        };

        if target.is_dir() {
            if visited.contains( &target ) {
                tracing::warn!( "Skipping link {:?}: {:?} was already walked", link, target );
                return Ok(());
            }
            self.scan_tree( &target, folder, visited, tally )
        } else {
            if is_audio_file( link ) {
                self.catalog_file( &target, folder, tally );
            }
            Ok(())
        }
    }


    fn catalog_file( &self, path: &Path, folder: &Folder, tally: &mut Tally ) {
        match self.add_file( path, folder ) {
            Ok( Outcome::Added ) => tally.added += 1,
            Ok( Outcome::Untagged ) => tally.untagged += 1,
            Ok( Outcome::Known ) => tally.known += 1,
            Err( CatalogError::NonUtf8Path( _ ) ) => {
                tracing::warn!( "Skipping {:?}: file name is not valid UTF-8", path );
                tally.failed += 1;
            }
            Err( e ) => {
                tracing::error!( "Failed to catalog {:?}: {}", path, e );
                tally.failed += 1;
            }
        }
    }


    /// Catalogs a single file unless it is already known.
    fn add_file( &self, path: &Path, folder: &Folder ) -> Result<Outcome, CatalogError> {
        if self.catalog.file_get_by_path( path )?.is_some() {
            return Ok( Outcome::Known );
        }

        let info = match self.tags.read( path ) {
            Ok( info ) => Some( info ),
            Err( e ) => {
                tracing::warn!( "Cannot read tags from {:?}: {}", path, e );
                None
            }
        };

        let result = self.catalog.atomic( |catalog| {
            let file = catalog.file_add( path, folder.id, 0, 0 )?;
            if let Some( info ) = &info {
                self.apply_tags( catalog, &file, info )?;
            }
            Ok(())
        });

        match result {
            Ok(()) if info.is_some() => Ok( Outcome::Added ),
            Ok(()) => Ok( Outcome::Untagged ),
            Err( CatalogError::Duplicate( _ ) ) => {
                tracing::debug!( "Already indexed: {:?}", path );
                Ok( Outcome::Known )
            }
            Err( e ) => Err( e ),
        }
    }


    fn apply_tags( &self, catalog: &Catalog, file: &File, info: &TagInfo ) -> Result<(), CatalogError> {
        if !info.title.is_empty() {
            catalog.file_set_title( file.id, &info.title )?;
        }
        if info.disc != 0 || info.track != 0 {
            catalog.file_set_ord( file.id, info.disc, info.track )?;
        }
        if !info.album.is_empty() {
            let program = find_or_create_program( catalog, &info.album, &info.artist )?;
            catalog.file_set_program( file.id, Some( program.id ) )?;
        }
        Ok(())
    }
}


/// Directory read failures carry the path that failed.
fn walk_error( top: &Path, err: walkdir::Error ) -> LibraryError {
    let path = err.path().unwrap_or( top ).to_path_buf();
    let source = err.into_io_error()
        .unwrap_or_else( || std::io::Error::other( "directory walk failed" ) );
    LibraryError::Io { path, source }
}


fn find_or_create_program( catalog: &Catalog, title: &str, creator: &str ) -> Result<Program, CatalogError> {
    if let Some( program ) = catalog.program_get_by_title( title )? {
        return Ok( program );
    }
    tracing::info!( "New program: {:?} by {:?}", title, creator );
    catalog.program_add( title, creator )
}


/// Checks if a file has a supported audio extension.
pub fn is_audio_file( path: &Path ) -> bool {
    path.extension()
        .and_then( |e| e.to_str() )
        .map( |e| SUPPORTED_EXTENSIONS.contains( &e.to_lowercase().as_str() ) )
        .unwrap_or( false )
}


/// Scans `root` on a worker thread with its own catalog handle.
pub fn spawn_scan(
    db_path: PathBuf,
    root: PathBuf,
    tags: Arc<dyn TagReader>,
) -> thread::JoinHandle<Result<Folder, LibraryError>> {
    thread::spawn( move || {
        let scanner = Scanner::new( Catalog::open( &db_path )?, tags );
        scanner.scan( &root )
    })
}


/// Rescans every known folder on a worker thread with its own catalog handle.
pub fn spawn_refresh(
    db_path: PathBuf,
    tags: Arc<dyn TagReader>,
) -> thread::JoinHandle<Result<Vec<Folder>, LibraryError>> {
    thread::spawn( move || {
        let scanner = Scanner::new( Catalog::open( &db_path )?, tags );
        scanner.refresh()
    })
}


#[cfg( test )]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use super::*;
    use crate::tags::TagError;


    /// Tag reader keyed by file name; unknown names fail like a corrupt file.
    #[derive( Default )]
    struct FakeTags {
        by_name: HashMap<String, TagInfo>,
    }


    impl FakeTags {
        fn with( mut self, name: &str, album: &str, disc: u32, track: u32, title: &str ) -> Self {
            self.by_name.insert( name.to_string(), TagInfo {
                artist: "Author".to_string(),
                album: album.to_string(),
                title: title.to_string(),
                disc,
                track,
            });
            self
        }
    }


    impl TagReader for FakeTags {
        fn read( &self, path: &Path ) -> Result<TagInfo, TagError> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            self.by_name
                .get( &name )
                .cloned()
                .ok_or_else( || TagError::Unsupported( name ) )
        }
    }


    fn touch( dir: &Path, name: &str ) -> PathBuf {
        let path = dir.join( name );
        if let Some( parent ) = path.parent() {
            fs::create_dir_all( parent ).unwrap();
        }
        fs::write( &path, b"" ).unwrap();
        path
    }


    fn scanner( tags: FakeTags ) -> Scanner {
        Scanner::new( Catalog::open_in_memory().unwrap(), Arc::new( tags ) )
    }


    #[test]
    fn test_is_audio_file() {
        assert!( is_audio_file( Path::new( "/a/b.mp3" ) ) );
        assert!( is_audio_file( Path::new( "/a/b.M4B" ) ) );
        assert!( is_audio_file( Path::new( "/a/b.Oga" ) ) );
        assert!( !is_audio_file( Path::new( "/a/b.jpg" ) ) );
        assert!( !is_audio_file( Path::new( "/a/b.wav" ) ) );
        assert!( !is_audio_file( Path::new( "/a/mp3" ) ) );
    }


    #[test]
    fn test_scan_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = scanner( FakeTags::default() );

        let folder = scanner.scan( dir.path() ).unwrap();
        assert!( folder.last_scan.timestamp() > 0 );

        let catalog = scanner.into_catalog();
        let folders = catalog.folder_get_all().unwrap();
        assert_eq!( folders.len(), 1 );
        assert_eq!( folders[ 0 ].last_scan, folder.last_scan );
        assert!( catalog.file_get_unassigned().unwrap().is_empty() );
        assert!( catalog.program_get_all().unwrap().is_empty() );
    }


    #[test]
    fn test_scan_groups_files_by_album() {
        let dir = tempfile::tempdir().unwrap();
        touch( dir.path(), "one.mp3" );
        touch( dir.path(), "two.ogg" );
        touch( dir.path(), "sub/three.flac" );
        touch( dir.path(), "cover.jpg" );

        let tags = FakeTags::default()
            .with( "one.mp3", "Foo", 1, 1, "One" )
            .with( "two.ogg", "Foo", 1, 2, "Two" )
            .with( "three.flac", "Foo", 1, 3, "Three" );
        let scanner = scanner( tags );
        scanner.scan( dir.path() ).unwrap();

        let catalog = scanner.into_catalog();
        let programs = catalog.program_get_all().unwrap();
        assert_eq!( programs.len(), 1 );
        assert_eq!( programs[ 0 ].title, "Foo" );
        assert_eq!( programs[ 0 ].creator, "Author" );
        assert_eq!( programs[ 0 ].url, "" );

        let files = catalog.file_get_by_program( programs[ 0 ].id ).unwrap();
        let titles: Vec<_> = files.iter().map( |f| f.title.as_str() ).collect();
        assert_eq!( titles, vec![ "One", "Two", "Three" ] );
        assert!( files.iter().all( |f| f.program_id == Some( programs[ 0 ].id ) ) );
    }


    #[test]
    fn test_unreadable_file_is_cataloged_blank() {
        let dir = tempfile::tempdir().unwrap();
        let broken = touch( dir.path(), "broken.mp3" );
        touch( dir.path(), "good.mp3" );

        let tags = FakeTags::default().with( "good.mp3", "Foo", 0, 1, "Good" );
        let scanner = scanner( tags );
        scanner.scan( dir.path() ).unwrap();

        let catalog = scanner.into_catalog();
        let path = fs::canonicalize( &broken ).unwrap();
        let file = catalog.file_get_by_path( &path ).unwrap().unwrap();
        assert_eq!( file.program_id, None );
        assert_eq!( file.title, "" );
        assert_eq!( ( file.ord1, file.ord2 ), ( 0, 0 ) );
        assert_eq!( catalog.program_get_all().unwrap().len(), 1 );
    }


    #[test]
    fn test_empty_album_leaves_file_unassigned() {
        let dir = tempfile::tempdir().unwrap();
        touch( dir.path(), "loose.mp3" );

        let tags = FakeTags::default().with( "loose.mp3", "", 2, 5, "Loose" );
        let scanner = scanner( tags );
        scanner.scan( dir.path() ).unwrap();

        let catalog = scanner.into_catalog();
        let loose = catalog.file_get_unassigned().unwrap();
        assert_eq!( loose.len(), 1 );
        assert_eq!( loose[ 0 ].title, "Loose" );
        assert_eq!( ( loose[ 0 ].ord1, loose[ 0 ].ord2 ), ( 2, 5 ) );
        assert!( catalog.program_get_all().unwrap().is_empty() );
    }


    #[test]
    fn test_rescan_is_idempotent_and_keeps_edits() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch( dir.path(), "a.mp3" );
        touch( dir.path(), "b.mp3" );

        let tags = FakeTags::default()
            .with( "a.mp3", "Foo", 0, 1, "A" )
            .with( "b.mp3", "Foo", 0, 2, "B" );
        let scanner = scanner( tags );
        scanner.scan( dir.path() ).unwrap();

        let catalog = &scanner.catalog;
        let a = catalog.file_get_by_path( &fs::canonicalize( &a ).unwrap() ).unwrap().unwrap();
        catalog.file_set_title( a.id, "Edited" ).unwrap();
        catalog.file_set_program( a.id, None ).unwrap();
        let before_programs = catalog.program_get_all().unwrap();
        let before_loose = catalog.file_get_unassigned().unwrap();
        let before_files = catalog.file_get_by_program( before_programs[ 0 ].id ).unwrap();

        scanner.scan( dir.path() ).unwrap();

        assert_eq!( catalog.folder_get_all().unwrap().len(), 1 );
        assert_eq!( catalog.program_get_all().unwrap(), before_programs );
        assert_eq!( catalog.file_get_unassigned().unwrap(), before_loose );
        assert_eq!( catalog.file_get_by_program( before_programs[ 0 ].id ).unwrap(), before_files );
        assert_eq!( catalog.file_get_by_id( a.id ).unwrap().unwrap().title, "Edited" );
    }


    #[test]
    fn test_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = scanner( FakeTags::default() );
        let result = scanner.scan( &dir.path().join( "nope" ) );
        assert!( matches!( result, Err( LibraryError::NotFound( _ ) ) ) );
        assert!( scanner.into_catalog().folder_get_all().unwrap().is_empty() );
    }


    #[cfg( unix )]
    #[test]
    fn test_symlink_loop_is_cataloged_once() {
        let dir = tempfile::tempdir().unwrap();
        touch( dir.path(), "book/ch1.mp3" );
        std::os::unix::fs::symlink( "..", dir.path().join( "book/up" ) ).unwrap();

        let scanner = scanner( FakeTags::default().with( "ch1.mp3", "Foo", 0, 1, "One" ) );
        scanner.scan( dir.path() ).unwrap();
        scanner.scan( dir.path() ).unwrap();

        let catalog = scanner.into_catalog();
        let program = catalog.program_get_by_title( "Foo" ).unwrap().unwrap();
        let files = catalog.file_get_by_program( program.id ).unwrap();
        assert_eq!( files.len(), 1 );
        assert!( files[ 0 ].path.exists() );
        assert!( catalog.file_get_unassigned().unwrap().is_empty() );
    }


    #[cfg( unix )]
    #[test]
    fn test_linked_directory_is_walked_once() {
        let dir = tempfile::tempdir().unwrap();
        let real = touch( dir.path(), "real/ch1.mp3" );
        std::os::unix::fs::symlink( dir.path().join( "real" ), dir.path().join( "alias" ) ).unwrap();
        std::os::unix::fs::symlink( dir.path().join( "gone" ), dir.path().join( "dangling" ) ).unwrap();

        let scanner = scanner( FakeTags::default().with( "ch1.mp3", "Foo", 0, 1, "One" ) );
        scanner.scan( dir.path() ).unwrap();

        let catalog = scanner.into_catalog();
        let program = catalog.program_get_by_title( "Foo" ).unwrap().unwrap();
        let files = catalog.file_get_by_program( program.id ).unwrap();
        assert_eq!( files.len(), 1 );
        assert_eq!( files[ 0 ].path, fs::canonicalize( &real ).unwrap() );
    }


    #[cfg( unix )]
    #[test]
    fn test_non_utf8_names_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        fs::write( dir.path().join( OsStr::from_bytes( b"a\xff.mp3" ) ), b"" ).unwrap();
        fs::write( dir.path().join( OsStr::from_bytes( b"a\xfe.mp3" ) ), b"" ).unwrap();
        touch( dir.path(), "good.mp3" );

        let scanner = scanner( FakeTags::default().with( "good.mp3", "", 0, 1, "Good" ) );
        scanner.scan( dir.path() ).unwrap();

        let catalog = scanner.into_catalog();
        let files = catalog.file_get_unassigned().unwrap();
        assert_eq!( files.len(), 1 );
        assert_eq!( files[ 0 ].title, "Good" );
        assert!( files[ 0 ].path.exists() );
    }


    #[cfg( unix )]
    #[test]
    fn test_unreadable_subdirectory_aborts_scan() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let a = touch( dir.path(), "a.mp3" );
        let locked = dir.path().join( "zz" );
        touch( dir.path(), "zz/later.mp3" );
        fs::set_permissions( &locked, fs::Permissions::from_mode( 0o000 ) ).unwrap();

        // Permission bits do not stop root.
        if fs::read_dir( &locked ).is_ok() {
            fs::set_permissions( &locked, fs::Permissions::from_mode( 0o755 ) ).unwrap();
            return;
        }

        let scanner = scanner( FakeTags::default().with( "a.mp3", "Foo", 0, 1, "A" ) );
        let result = scanner.scan( dir.path() );
        fs::set_permissions( &locked, fs::Permissions::from_mode( 0o755 ) ).unwrap();

        match result {
            Err( LibraryError::Io { path, .. } ) => assert!( path.ends_with( "zz" ) ),
            other => panic!( "expected an IO error, got {:?}", other ),
        }

        let catalog = scanner.into_catalog();
        let folders = catalog.folder_get_all().unwrap();
        assert_eq!( folders.len(), 1 );
        assert_eq!( folders[ 0 ].last_scan.timestamp(), 0 );
        assert!( catalog.file_get_by_path( &fs::canonicalize( &a ).unwrap() ).unwrap().is_some() );
        assert_eq!( catalog.program_get_all().unwrap().len(), 1 );
    }


    /// Inserts the file through a second handle while its tags are read.
    struct RacingTags {
        db_path: PathBuf,
    }


    impl TagReader for RacingTags {
        fn read( &self, path: &Path ) -> Result<TagInfo, TagError> {
            let other = Catalog::open( &self.db_path ).unwrap();
            let folder = other.folder_get_all().unwrap().remove( 0 );
            other.file_add( path, folder.id, 0, 0 ).unwrap();
            Ok( TagInfo {
                artist: "Author".to_string(),
                album: "Foo".to_string(),
                title: "Raced".to_string(),
                disc: 0,
                track: 1,
            })
        }
    }


    #[test]
    fn test_concurrent_insert_counts_as_known() {
        let music = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let db_path = db.path().join( "vox.db" );
        let a = touch( music.path(), "a.mp3" );

        let scanner = Scanner::new(
            Catalog::open( &db_path ).unwrap(),
            Arc::new( RacingTags { db_path: db_path.clone() } ),
        );
        let folder = scanner.scan( music.path() ).unwrap();
        assert!( folder.last_scan.timestamp() > 0 );

        let catalog = scanner.into_catalog();
        let loose = catalog.file_get_unassigned().unwrap();
        assert_eq!( loose.len(), 1 );
        assert_eq!( loose[ 0 ].path, fs::canonicalize( &a ).unwrap() );
        assert_eq!( loose[ 0 ].title, "" );
        assert!( catalog.program_get_all().unwrap().is_empty() );
    }


    #[test]
    fn test_refresh_picks_up_new_files() {
        let dir = tempfile::tempdir().unwrap();
        touch( dir.path(), "a.mp3" );

        let tags = FakeTags::default()
            .with( "a.mp3", "Foo", 0, 1, "A" )
            .with( "b.mp3", "Foo", 0, 2, "B" );
        let scanner = scanner( tags );
        scanner.scan( dir.path() ).unwrap();
        touch( dir.path(), "b.mp3" );

        let folders = scanner.refresh().unwrap();
        assert_eq!( folders.len(), 1 );

        let catalog = scanner.into_catalog();
        let program = catalog.program_get_by_title( "Foo" ).unwrap().unwrap();
        assert_eq!( catalog.file_get_by_program( program.id ).unwrap().len(), 2 );
    }


    #[test]
    fn test_spawn_scan_uses_own_handle() {
        let music = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        let db_path = db.path().join( "vox.db" );
        touch( music.path(), "x.mp3" );
        touch( music.path(), "y.mp3" );

        let tags: Arc<dyn TagReader> = Arc::new( FakeTags::default()
            .with( "x.mp3", "Bar", 0, 1, "X" )
            .with( "y.mp3", "Bar", 0, 2, "Y" ) );

        let handle = spawn_scan( db_path.clone(), music.path().to_path_buf(), Arc::clone( &tags ) );
        let folder = handle.join().unwrap().unwrap();
        assert!( folder.last_scan.timestamp() > 0 );

        let again = spawn_refresh( db_path.clone(), tags ).join().unwrap().unwrap();
        assert_eq!( again.len(), 1 );

        let catalog = Catalog::open( &db_path ).unwrap();
        let program = catalog.program_get_by_title( "Bar" ).unwrap().unwrap();
        assert_eq!( catalog.file_get_by_program( program.id ).unwrap().len(), 2 );
    }
}
