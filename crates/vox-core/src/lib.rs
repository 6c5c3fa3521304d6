//! Vox Core - Audiobook and podcast catalog with resumable playback
//!
//! This crate provides the catalog store, the incremental library scanner,
//! tag reading, the playback controller and, with the `output` feature, a
//! local audio engine built on Symphonia and cpal.

pub mod catalog;
pub mod command;
pub mod engine;
pub mod library;
pub mod model;
pub mod player;
pub mod playlist;
pub mod tags;

#[cfg( feature = "output" )]
pub mod audio;
#[cfg( feature = "output" )]
pub mod decoder;
#[cfg( feature = "output" )]
pub mod output;

pub use catalog::{ Catalog, CatalogError };
pub use command::{ Command, CommandError };
pub use engine::{ EngineError, EngineEvent, MediaEngine };
pub use library::{ LibraryError, Scanner };
pub use model::{ File, Folder, Program };
pub use player::{ PlaybackState, Player, PlayerError, PlayerView, Step };
pub use playlist::Playlist;
pub use tags::{ SymphoniaTagReader, TagInfo, TagReader };

#[cfg( feature = "output" )]
pub use audio::AudioEngine;
