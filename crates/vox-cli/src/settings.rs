//! Application settings management
//!
//! Optional JSON file at `<config dir>/vox/settings.json`; any field left out
//! takes its default.

use std::fs;
use std::path::{ Path, PathBuf };

use anyhow::{ Context, Result };
use serde::{ Deserialize, Serialize };


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Catalog database; the platform data directory when unset
    pub database: Option<PathBuf>,

    /// How often playback position is written back, in milliseconds
    pub tick_interval_ms: u64,

    /// Log filter used when no verbosity flag is given
    pub log_level: String,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            database: None,
            tick_interval_ms: 1000,
            log_level: "info".to_string(),
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "vox" ).join( "settings.json" ) )
    }


    /// Loads settings from disk; defaults when there is no settings file.
    pub fn load() -> Result<Self> {
        match Self::settings_path() {
            Some( path ) if path.exists() => Self::load_from( &path ),
            _ => Ok( Self::default() ),
        }
    }


    fn load_from( path: &Path ) -> Result<Self> {
        let contents = fs::read_to_string( path )
            .with_context( || format!( "Failed to read {}", path.display() ) )?;
        serde_json::from_str( &contents )
            .with_context( || format!( "Invalid settings in {}", path.display() ) )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "tick_interval_ms": 250 }"# ).unwrap();

        let settings = Settings::load_from( &path ).unwrap();
        assert_eq!( settings.tick_interval_ms, 250 );
        assert_eq!( settings.log_level, "info" );
        assert_eq!( settings.database, None );
    }


    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "not json" ).unwrap();
        assert!( Settings::load_from( &path ).is_err() );
    }
}
