//! Persistent catalog of folders, programs and files
//!
//! A thin typed layer over SQLite. A `Catalog` wraps a single connection and is
//! not meant to be shared between threads: every worker opens its own handle
//! on the same database file.

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use chrono::{ DateTime, Utc };
use rusqlite::{ params, Connection, ErrorCode, OptionalExtension, Row };
use thiserror::Error;

use crate::model::{ from_unix, File, Folder, Program };


/// How long a handle waits on a database locked by another handle.
const BUSY_TIMEOUT: Duration = Duration::from_secs( 5 );


const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS folder (
        id              INTEGER PRIMARY KEY,
        path            TEXT UNIQUE NOT NULL,
        last_scan       INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS program (
        id              INTEGER PRIMARY KEY,
        title           TEXT UNIQUE NOT NULL CHECK (title <> ''),
        creator         TEXT NOT NULL DEFAULT '',
        url             TEXT NOT NULL DEFAULT '',
        current_file    INTEGER REFERENCES file (id)
                            ON DELETE SET NULL
    );

    CREATE INDEX IF NOT EXISTS prog_creator_idx ON program (creator);

    CREATE TABLE IF NOT EXISTS file (
        id              INTEGER PRIMARY KEY,
        program_id      INTEGER REFERENCES program (id)
                            ON DELETE CASCADE
                            ON UPDATE RESTRICT,
        folder_id       INTEGER NOT NULL REFERENCES folder (id)
                            ON DELETE CASCADE
                            ON UPDATE RESTRICT,
        path            TEXT UNIQUE NOT NULL,
        ord1            INTEGER NOT NULL DEFAULT 0 CHECK (ord1 >= 0),
        ord2            INTEGER NOT NULL DEFAULT 0 CHECK (ord2 >= 0),
        title           TEXT NOT NULL DEFAULT '',
        position        INTEGER NOT NULL DEFAULT 0 CHECK (position >= 0),
        last_played     INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS file_prog_idx ON file (program_id);
    CREATE INDEX IF NOT EXISTS file_folder_idx ON file (folder_id);
    CREATE INDEX IF NOT EXISTS file_ord_idx ON file (ord1, ord2);
"#;


const FILE_COLUMNS: &str =
    "id, program_id, folder_id, path, ord1, ord2, title, position, last_played";

const PROGRAM_COLUMNS: &str = "id, title, creator, url, current_file";

const FOLDER_COLUMNS: &str = "id, path, last_scan";


/// Errors raised by catalog operations.
#[derive( Debug, Error )]
pub enum CatalogError {
    #[error( "Database error: {0}" )]
    Sqlite( #[from] rusqlite::Error ),

    #[error( "Already in catalog: {0}" )]
    Duplicate( String ),

    #[error( "Path is not absolute: {0}" )]
    RelativePath( PathBuf ),

    #[error( "Path is not valid UTF-8: {0:?}" )]
    NonUtf8Path( PathBuf ),

    #[error( "No such {0}" )]
    NotFound( String ),

    #[error( "Failed to create catalog directory: {0}" )]
    Io( #[from] std::io::Error ),
}


impl CatalogError {
    /// Turns a unique-constraint violation into `Duplicate`.
    fn from_insert( err: rusqlite::Error, key: &str ) -> Self {
        match err {
            rusqlite::Error::SqliteFailure( ref e, _ )
                if e.code == ErrorCode::ConstraintViolation
                    && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                CatalogError::Duplicate( key.to_string() )
            }
            other => CatalogError::Sqlite( other ),
        }
    }
}


type Result<T> = std::result::Result<T, CatalogError>;


/// A handle on the catalog database.
pub struct Catalog {
    conn: Connection,
}


impl Catalog {
    /// Opens (and if needed creates) the catalog at `path`.
    pub fn open<P: AsRef<Path>>( path: P ) -> Result<Self> {
        let path = path.as_ref();
        if let Some( parent ) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all( parent )?;
            }
        }

        let conn = Connection::open( path )?;
        conn.busy_timeout( BUSY_TIMEOUT )?;
        conn.pragma_update_and_check( None, "journal_mode", "WAL", |_| Ok(()) )?;
        Self::init( conn )
    }


    /// Opens a private in-memory catalog.
    pub fn open_in_memory() -> Result<Self> {
        Self::init( Connection::open_in_memory()? )
    }


    fn init( conn: Connection ) -> Result<Self> {
        conn.pragma_update( None, "foreign_keys", true )?;
        conn.execute_batch( SCHEMA )?;
        Ok( Self { conn } )
    }


    /// Default catalog location: `<data dir>/vox/vox.db`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map( |d| d.join( "vox" ).join( "vox.db" ) )
    }


    /// Runs `f` inside one transaction; any error rolls the whole thing back.
    pub fn atomic<T, F>( &self, f: F ) -> Result<T>
    where
        F: FnOnce( &Self ) -> Result<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let value = f( self )?;
        tx.commit()?;
        Ok( value )
    }


    // ---- folders ----


    pub fn folder_add( &self, path: &Path ) -> Result<Folder> {
        let key = absolute_str( path )?;
        self.conn
            .execute( "INSERT INTO folder (path) VALUES (?1)", params![ key ] )
            .map_err( |e| CatalogError::from_insert( e, &key ) )?;

        Ok( Folder {
            id: self.conn.last_insert_rowid(),
            path: path.to_path_buf(),
            last_scan: DateTime::default(),
        })
    }


    pub fn folder_get_by_path( &self, path: &Path ) -> Result<Option<Folder>> {
        let sql = format!( "SELECT {FOLDER_COLUMNS} FROM folder WHERE path = ?1" );
        let folder = self.conn
            .query_row( &sql, params![ path_str( path )? ], folder_from_row )
            .optional()?;
        Ok( folder )
    }


    pub fn folder_get_by_id( &self, id: i64 ) -> Result<Option<Folder>> {
        let sql = format!( "SELECT {FOLDER_COLUMNS} FROM folder WHERE id = ?1" );
        Ok( self.conn.query_row( &sql, params![ id ], folder_from_row ).optional()? )
    }


    pub fn folder_get_all( &self ) -> Result<Vec<Folder>> {
        let sql = format!( "SELECT {FOLDER_COLUMNS} FROM folder ORDER BY path" );
        let mut stmt = self.conn.prepare( &sql )?;
        let folders = stmt
            .query_map( [], folder_from_row )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok( folders )
    }


    pub fn folder_update_scan( &self, id: i64, when: DateTime<Utc> ) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE folder SET last_scan = ?1 WHERE id = ?2",
            params![ when.timestamp(), id ],
        )?;
        expect_one( n, "folder" )
    }


    // ---- programs ----


    pub fn program_add( &self, title: &str, creator: &str ) -> Result<Program> {
        self.conn
            .execute(
                "INSERT INTO program (title, creator) VALUES (?1, ?2)",
                params![ title, creator ],
            )
            .map_err( |e| CatalogError::from_insert( e, title ) )?;

        Ok( Program {
            id: self.conn.last_insert_rowid(),
            title: title.to_string(),
            creator: creator.to_string(),
            url: String::new(),
            current_file: None,
        })
    }


    pub fn program_get_by_id( &self, id: i64 ) -> Result<Option<Program>> {
        let sql = format!( "SELECT {PROGRAM_COLUMNS} FROM program WHERE id = ?1" );
        Ok( self.conn.query_row( &sql, params![ id ], program_from_row ).optional()? )
    }


    pub fn program_get_by_title( &self, title: &str ) -> Result<Option<Program>> {
        let sql = format!( "SELECT {PROGRAM_COLUMNS} FROM program WHERE title = ?1" );
        Ok( self.conn.query_row( &sql, params![ title ], program_from_row ).optional()? )
    }


    pub fn program_get_all( &self ) -> Result<Vec<Program>> {
        let sql = format!( "SELECT {PROGRAM_COLUMNS} FROM program ORDER BY title" );
        let mut stmt = self.conn.prepare( &sql )?;
        let programs = stmt
            .query_map( [], program_from_row )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok( programs )
    }


    pub fn program_set_title( &self, id: i64, title: &str ) -> Result<()> {
        let n = self.conn
            .execute( "UPDATE program SET title = ?1 WHERE id = ?2", params![ title, id ] )
            .map_err( |e| CatalogError::from_insert( e, title ) )?;
        expect_one( n, "program" )
    }


    pub fn program_set_creator( &self, id: i64, creator: &str ) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE program SET creator = ?1 WHERE id = ?2",
            params![ creator, id ],
        )?;
        expect_one( n, "program" )
    }


    pub fn program_set_url( &self, id: i64, url: &str ) -> Result<()> {
        let n = self.conn
            .execute( "UPDATE program SET url = ?1 WHERE id = ?2", params![ url, id ] )?;
        expect_one( n, "program" )
    }


    /// Records which file playback of a program resumes from.
    pub fn program_set_current_file( &self, id: i64, file_id: Option<i64> ) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE program SET current_file = ?1 WHERE id = ?2",
            params![ file_id, id ],
        )?;
        expect_one( n, "program" )
    }


    /// Deletes a program together with all of its files.
    pub fn program_delete( &self, id: i64 ) -> Result<()> {
        let n = self.conn.execute( "DELETE FROM program WHERE id = ?1", params![ id ] )?;
        expect_one( n, "program" )
    }


    // ---- files ----


    pub fn file_add( &self, path: &Path, folder_id: i64, ord1: u32, ord2: u32 ) -> Result<File> {
        let key = absolute_str( path )?;
        self.conn
            .execute(
                "INSERT INTO file (path, folder_id, ord1, ord2) VALUES (?1, ?2, ?3, ?4)",
                params![ key, folder_id, ord1, ord2 ],
            )
            .map_err( |e| CatalogError::from_insert( e, &key ) )?;

        Ok( File {
            id: self.conn.last_insert_rowid(),
            program_id: None,
            folder_id,
            path: path.to_path_buf(),
            ord1,
            ord2,
            title: String::new(),
            position: Duration::ZERO,
            last_played: DateTime::default(),
        })
    }


    pub fn file_get_by_id( &self, id: i64 ) -> Result<Option<File>> {
        let sql = format!( "SELECT {FILE_COLUMNS} FROM file WHERE id = ?1" );
        Ok( self.conn.query_row( &sql, params![ id ], file_from_row ).optional()? )
    }


    pub fn file_get_by_path( &self, path: &Path ) -> Result<Option<File>> {
        let sql = format!( "SELECT {FILE_COLUMNS} FROM file WHERE path = ?1" );
        let file = self.conn
            .query_row( &sql, params![ path_str( path )? ], file_from_row )
            .optional()?;
        Ok( file )
    }


    /// Files of a program in playlist order.
    pub fn file_get_by_program( &self, program_id: i64 ) -> Result<Vec<File>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM file WHERE program_id = ?1 \
             ORDER BY ord1, ord2, title, path"
        );
        self.files_where( &sql, params![ program_id ] )
    }


    /// Files no program has claimed, in playlist order.
    pub fn file_get_unassigned( &self ) -> Result<Vec<File>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM file WHERE program_id IS NULL \
             ORDER BY ord1, ord2, title, path"
        );
        self.files_where( &sql, params![] )
    }


    fn files_where<P: rusqlite::Params>( &self, sql: &str, args: P ) -> Result<Vec<File>> {
        let mut stmt = self.conn.prepare( sql )?;
        let files = stmt
            .query_map( args, file_from_row )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok( files )
    }


    pub fn file_set_title( &self, id: i64, title: &str ) -> Result<()> {
        let n = self.conn
            .execute( "UPDATE file SET title = ?1 WHERE id = ?2", params![ title, id ] )?;
        expect_one( n, "file" )
    }


    /// Stores the resume offset (whole seconds) and when it was reached.
    pub fn file_set_position( &self, id: i64, position: Duration, when: DateTime<Utc> ) -> Result<()> {
        let secs = i64::try_from( position.as_secs() ).unwrap_or( i64::MAX );
        let n = self.conn.execute(
            "UPDATE file SET position = ?1, last_played = ?2 WHERE id = ?3",
            params![ secs, when.timestamp(), id ],
        )?;
        expect_one( n, "file" )
    }


    /// Moves a file to another program, or detaches it with `None`.
    pub fn file_set_program( &self, id: i64, program_id: Option<i64> ) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE file SET program_id = ?1 WHERE id = ?2",
            params![ program_id, id ],
        )?;
        expect_one( n, "file" )
    }


    pub fn file_set_ord( &self, id: i64, ord1: u32, ord2: u32 ) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE file SET ord1 = ?1, ord2 = ?2 WHERE id = ?3",
            params![ ord1, ord2, id ],
        )?;
        expect_one( n, "file" )
    }


    pub fn file_delete( &self, id: i64 ) -> Result<()> {
        let n = self.conn.execute( "DELETE FROM file WHERE id = ?1", params![ id ] )?;
        expect_one( n, "file" )
    }
}


/// Text key of a path; names that are not UTF-8 are refused, never mangled.
fn path_str( path: &Path ) -> Result<&str> {
    path.to_str().ok_or_else( || CatalogError::NonUtf8Path( path.to_path_buf() ) )
}


fn absolute_str( path: &Path ) -> Result<String> {
    if !path.is_absolute() {
        return Err( CatalogError::RelativePath( path.to_path_buf() ) );
    }
    Ok( path_str( path )?.to_string() )
}


fn expect_one( changed: usize, what: &str ) -> Result<()> {
    if changed == 0 {
        Err( CatalogError::NotFound( what.to_string() ) )
    } else {
        Ok(())
    }
}


fn folder_from_row( row: &Row ) -> rusqlite::Result<Folder> {
    Ok( Folder {
        id: row.get( 0 )?,
        path: PathBuf::from( row.get::<_, String>( 1 )? ),
        last_scan: from_unix( row.get( 2 )? ),
    })
}


fn program_from_row( row: &Row ) -> rusqlite::Result<Program> {
    Ok( Program {
        id: row.get( 0 )?,
        title: row.get( 1 )?,
        creator: row.get( 2 )?,
        url: row.get( 3 )?,
        current_file: row.get( 4 )?,
    })
}


fn file_from_row( row: &Row ) -> rusqlite::Result<File> {
    let position: i64 = row.get( 7 )?;
    Ok( File {
        id: row.get( 0 )?,
        program_id: row.get( 1 )?,
        folder_id: row.get( 2 )?,
        path: PathBuf::from( row.get::<_, String>( 3 )? ),
        ord1: row.get( 4 )?,
        ord2: row.get( 5 )?,
        title: row.get( 6 )?,
        position: Duration::from_secs( u64::try_from( position ).unwrap_or( 0 ) ),
        last_played: from_unix( row.get( 8 )? ),
    })
}


#[cfg( test )]
mod tests {
    use super::*;


    fn catalog_with_folder() -> ( Catalog, Folder ) {
        let catalog = Catalog::open_in_memory().unwrap();
        let folder = catalog.folder_add( Path::new( "/books" ) ).unwrap();
        ( catalog, folder )
    }


    #[test]
    fn test_folder_roundtrip() {
        let ( catalog, folder ) = catalog_with_folder();
        assert_eq!( folder.last_scan.timestamp(), 0 );

        let found = catalog.folder_get_by_path( Path::new( "/books" ) ).unwrap().unwrap();
        assert_eq!( found, folder );

        let now = from_unix( 1_700_000_000 );
        catalog.folder_update_scan( folder.id, now ).unwrap();
        let found = catalog.folder_get_by_id( folder.id ).unwrap().unwrap();
        assert_eq!( found.last_scan, now );
    }


    #[test]
    fn test_duplicate_folder_path() {
        let ( catalog, _ ) = catalog_with_folder();
        let result = catalog.folder_add( Path::new( "/books" ) );
        assert!( matches!( result, Err( CatalogError::Duplicate( _ ) ) ) );
        assert_eq!( catalog.folder_get_all().unwrap().len(), 1 );
    }


    #[test]
    fn test_relative_path_rejected() {
        let ( catalog, folder ) = catalog_with_folder();
        assert!( matches!(
            catalog.folder_add( Path::new( "books" ) ),
            Err( CatalogError::RelativePath( _ ) )
        ));
        assert!( matches!(
            catalog.file_add( Path::new( "a.mp3" ), folder.id, 0, 0 ),
            Err( CatalogError::RelativePath( _ ) )
        ));
    }


    #[cfg( unix )]
    #[test]
    fn test_non_utf8_paths_refused() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let ( catalog, folder ) = catalog_with_folder();
        let first = Path::new( "/books" ).join( OsStr::from_bytes( b"a\xff.mp3" ) );
        let second = Path::new( "/books" ).join( OsStr::from_bytes( b"a\xfe.mp3" ) );

        assert!( matches!(
            catalog.file_add( &first, folder.id, 0, 0 ),
            Err( CatalogError::NonUtf8Path( p ) ) if p == first
        ));
        assert!( matches!(
            catalog.file_add( &second, folder.id, 0, 0 ),
            Err( CatalogError::NonUtf8Path( _ ) )
        ));
        assert!( matches!( catalog.file_get_by_path( &first ), Err( CatalogError::NonUtf8Path( _ ) ) ) );
        assert!( matches!( catalog.folder_add( &first ), Err( CatalogError::NonUtf8Path( _ ) ) ) );
        assert!( catalog.file_get_unassigned().unwrap().is_empty() );
    }


    #[test]
    fn test_duplicate_file_path() {
        let ( catalog, folder ) = catalog_with_folder();
        catalog.file_add( Path::new( "/books/a.mp3" ), folder.id, 0, 0 ).unwrap();
        let again = catalog.file_add( Path::new( "/books/a.mp3" ), folder.id, 1, 1 );
        assert!( matches!( again, Err( CatalogError::Duplicate( _ ) ) ) );
    }


    #[test]
    fn test_file_requires_existing_folder() {
        let ( catalog, folder ) = catalog_with_folder();
        let result = catalog.file_add( Path::new( "/books/a.mp3" ), folder.id + 100, 0, 0 );
        assert!( matches!( result, Err( CatalogError::Sqlite( _ ) ) ) );
    }


    #[test]
    fn test_program_title_unique_and_non_empty() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.program_add( "Foo", "Someone" ).unwrap();
        assert!( matches!(
            catalog.program_add( "Foo", "Other" ),
            Err( CatalogError::Duplicate( _ ) )
        ));
        assert!( catalog.program_add( "", "Nobody" ).is_err() );
    }


    #[test]
    fn test_program_current_file_nullable() {
        let ( catalog, folder ) = catalog_with_folder();
        let program = catalog.program_add( "Foo", "" ).unwrap();
        let file = catalog.file_add( Path::new( "/books/a.mp3" ), folder.id, 0, 0 ).unwrap();

        catalog.program_set_current_file( program.id, Some( file.id ) ).unwrap();
        let p = catalog.program_get_by_title( "Foo" ).unwrap().unwrap();
        assert_eq!( p.current_file, Some( file.id ) );

        catalog.program_set_current_file( program.id, None ).unwrap();
        let p = catalog.program_get_by_id( program.id ).unwrap().unwrap();
        assert_eq!( p.current_file, None );
    }


    #[test]
    fn test_program_edits() {
        let catalog = Catalog::open_in_memory().unwrap();
        let program = catalog.program_add( "Foo", "" ).unwrap();
        catalog.program_add( "Bar", "" ).unwrap();

        catalog.program_set_title( program.id, "Foo, Revised" ).unwrap();
        catalog.program_set_creator( program.id, "A. Writer" ).unwrap();
        catalog.program_set_url( program.id, "https://example.com/feed" ).unwrap();

        let p = catalog.program_get_by_id( program.id ).unwrap().unwrap();
        assert_eq!( p.title, "Foo, Revised" );
        assert_eq!( p.creator, "A. Writer" );
        assert_eq!( p.url, "https://example.com/feed" );
        assert!( matches!(
            catalog.program_set_title( program.id, "Bar" ),
            Err( CatalogError::Duplicate( _ ) )
        ));
    }


    #[test]
    fn test_deleting_current_file_clears_reference() {
        let ( catalog, folder ) = catalog_with_folder();
        let program = catalog.program_add( "Foo", "" ).unwrap();
        let file = catalog.file_add( Path::new( "/books/a.mp3" ), folder.id, 0, 0 ).unwrap();
        catalog.program_set_current_file( program.id, Some( file.id ) ).unwrap();

        catalog.file_delete( file.id ).unwrap();
        let p = catalog.program_get_by_id( program.id ).unwrap().unwrap();
        assert_eq!( p.current_file, None );
    }


    #[test]
    fn test_program_delete_cascades_to_files() {
        let ( catalog, folder ) = catalog_with_folder();
        let program = catalog.program_add( "Foo", "" ).unwrap();
        let file = catalog.file_add( Path::new( "/books/a.mp3" ), folder.id, 0, 0 ).unwrap();
        catalog.file_set_program( file.id, Some( program.id ) ).unwrap();

        catalog.program_delete( program.id ).unwrap();
        assert!( catalog.file_get_by_id( file.id ).unwrap().is_none() );
    }


    #[test]
    fn test_files_by_program_ordering() {
        let ( catalog, folder ) = catalog_with_folder();
        let program = catalog.program_add( "Foo", "" ).unwrap();

        let specs = [
            ( "/books/e.mp3", 2, 1, "" ),
            ( "/books/d.mp3", 1, 2, "b" ),
            ( "/books/c.mp3", 1, 2, "a" ),
            ( "/books/b.mp3", 1, 1, "" ),
            ( "/books/a.mp3", 1, 1, "" ),
        ];
        for ( path, ord1, ord2, title ) in specs {
            let f = catalog.file_add( Path::new( path ), folder.id, ord1, ord2 ).unwrap();
            catalog.file_set_title( f.id, title ).unwrap();
            catalog.file_set_program( f.id, Some( program.id ) ).unwrap();
        }

        let paths: Vec<_> = catalog.file_get_by_program( program.id ).unwrap()
            .into_iter()
            .map( |f| f.path )
            .collect();
        assert_eq!( paths, vec![
            PathBuf::from( "/books/a.mp3" ),
            PathBuf::from( "/books/b.mp3" ),
            PathBuf::from( "/books/c.mp3" ),
            PathBuf::from( "/books/d.mp3" ),
            PathBuf::from( "/books/e.mp3" ),
        ]);
    }


    #[test]
    fn test_unassigned_files() {
        let ( catalog, folder ) = catalog_with_folder();
        let program = catalog.program_add( "Foo", "" ).unwrap();
        let a = catalog.file_add( Path::new( "/books/a.mp3" ), folder.id, 0, 0 ).unwrap();
        let b = catalog.file_add( Path::new( "/books/b.mp3" ), folder.id, 0, 0 ).unwrap();
        catalog.file_set_program( a.id, Some( program.id ) ).unwrap();

        let loose = catalog.file_get_unassigned().unwrap();
        assert_eq!( loose.len(), 1 );
        assert_eq!( loose[ 0 ].id, b.id );
    }


    #[test]
    fn test_position_roundtrip() {
        let ( catalog, folder ) = catalog_with_folder();
        let file = catalog.file_add( Path::new( "/books/a.mp3" ), folder.id, 0, 0 ).unwrap();
        let when = from_unix( 1_700_000_123 );

        catalog.file_set_position( file.id, Duration::from_millis( 95_700 ), when ).unwrap();
        let f = catalog.file_get_by_path( Path::new( "/books/a.mp3" ) ).unwrap().unwrap();
        assert_eq!( f.position, Duration::from_secs( 95 ) );
        assert_eq!( f.last_played, when );
    }


    #[test]
    fn test_update_missing_row() {
        let catalog = Catalog::open_in_memory().unwrap();
        assert!( matches!(
            catalog.file_set_title( 42, "nope" ),
            Err( CatalogError::NotFound( _ ) )
        ));
    }


    #[test]
    fn test_atomic_rolls_back() {
        let ( catalog, folder ) = catalog_with_folder();
        let result: Result<()> = catalog.atomic( |c| {
            c.file_add( Path::new( "/books/a.mp3" ), folder.id, 0, 0 )?;
            Err( CatalogError::NotFound( "forced".into() ) )
        });
        assert!( result.is_err() );
        assert!( catalog.file_get_by_path( Path::new( "/books/a.mp3" ) ).unwrap().is_none() );
    }


    #[test]
    fn test_open_on_disk_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "vox.db" );
        let catalog = Catalog::open( &path ).unwrap();
        catalog.folder_add( Path::new( "/books" ) ).unwrap();
        drop( catalog );

        let reopened = Catalog::open( &path ).unwrap();
        assert_eq!( reopened.folder_get_all().unwrap().len(), 1 );
    }
}
