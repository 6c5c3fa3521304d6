//! Playback controller
//!
//! Owns the in-memory playback state, drives a `MediaEngine`, and writes resume
//! information back to the catalog. Every state-changing operation takes the
//! single `Mutex` around `Inner`; operations that need another operation's
//! logic call its `*_locked` form with the guard they already hold.

use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::mpsc::Receiver;
use std::sync::{ Arc, Mutex, MutexGuard };
use std::thread::{ self, JoinHandle, ThreadId };
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::catalog::{ Catalog, CatalogError };
use crate::engine::{ file_uri, EngineError, EngineEvent, MediaEngine };
use crate::model::{ File, Program };
use crate::playlist::Playlist;


/// Errors that can occur during playback.
#[derive( Debug, Error )]
pub enum PlayerError {
    #[error( "Catalog error: {0}" )]
    Catalog( #[from] CatalogError ),

    #[error( "Engine error: {0}" )]
    Engine( #[from] EngineError ),
}


/// Current playback state.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
    /// The engine failed and could not be halted cleanly.
    Other,
}


/// Events that move the state machine.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Trigger {
    Play,
    Toggle,
    Stop,
    EndOfStream { has_next: bool },
    Error,
    /// An engine error whose recovery stop also failed.
    Fault,
}


impl PlaybackState {
    /// Applies one transition.
    pub fn on( self, trigger: Trigger ) -> Self {
        use PlaybackState::*;

        match ( self, trigger ) {
            ( _, Trigger::Play ) => Playing,
            ( Playing, Trigger::Toggle ) => Paused,
            ( Paused, Trigger::Toggle ) => Playing,
            ( state, Trigger::Toggle ) => state,
            ( _, Trigger::Stop ) => Stopped,
            ( _, Trigger::EndOfStream { has_next: true } ) => Playing,
            ( _, Trigger::EndOfStream { has_next: false } ) => Stopped,
            ( _, Trigger::Error ) => Stopped,
            ( _, Trigger::Fault ) => Other,
        }
    }


    pub fn label( self ) -> &'static str {
        match self {
            PlaybackState::Stopped => "Stopped",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
            PlaybackState::Other => "Error",
        }
    }
}


/// Outcome of `next` / `previous`.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Step {
    Moved( usize ),
    /// Already at the first or last track; nothing changed.
    Boundary,
}


/// Receives user-facing notifications from the player.
///
/// Called with the player's lock held: implementations must not call back
/// into the player, except `Player::seek`, which is refused while a tick is
/// updating the seek indicator.
pub trait PlayerView: Send + Sync {
    fn status( &self, _file: Option<&File>, _state: PlaybackState ) {}
    fn message( &self, _text: &str ) {}
    fn seek_changed( &self, _position: Duration, _duration: Option<Duration> ) {}
    fn seek_reset( &self ) {}
}


/// A view that ignores everything.
pub struct NullView;

impl PlayerView for NullView {}


struct Inner {
    state: PlaybackState,
    playlist: Playlist,
    program: Option<Program>,
    active: Option<File>,
    active_uri: Option<String>,
    catalog: Catalog,
    engine: Box<dyn MediaEngine>,
}


/// Marks the current thread as updating the seek indicator for as long as
/// it lives. Seeks from other threads are unaffected.
struct SeekGuard<'a>( &'a Mutex<Option<ThreadId>> );

impl<'a> SeekGuard<'a> {
    fn hold( holder: &'a Mutex<Option<ThreadId>> ) -> Self {
        *holder.lock().unwrap_or_else( |e| e.into_inner() ) = Some( thread::current().id() );
        Self( holder )
    }


    fn is_held_here( holder: &Mutex<Option<ThreadId>> ) -> bool {
        *holder.lock().unwrap_or_else( |e| e.into_inner() ) == Some( thread::current().id() )
    }
}

impl Drop for SeekGuard<'_> {
    fn drop( &mut self ) {
        *self.0.lock().unwrap_or_else( |e| e.into_inner() ) = None;
    }
}


/// Thread-safe playback controller.
pub struct Player {
    inner: Mutex<Inner>,
    seek_guard: Mutex<Option<ThreadId>>,
    view: Arc<dyn PlayerView>,
}


impl Player {
    /// Creates a stopped player with its own catalog handle.
    pub fn new( catalog: Catalog, engine: Box<dyn MediaEngine>, view: Arc<dyn PlayerView> ) -> Self {
        Self {
            inner: Mutex::new( Inner {
                state: PlaybackState::Stopped,
                playlist: Playlist::new(),
                program: None,
                active: None,
                active_uri: None,
                catalog,
                engine,
            }),
            seek_guard: Mutex::new( None ),
            view,
        }
    }


    fn lock( &self ) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else( |e| e.into_inner() )
    }


    /// Loads a program's files and plays from its resume point.
    ///
    /// Returns the playlist index started, or `None` for an empty program.
    pub fn play_program( &self, program_id: i64 ) -> Result<Option<usize>, PlayerError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let mut program = inner.catalog
            .program_get_by_id( program_id )?
            .ok_or_else( || CatalogError::NotFound( format!( "program {}", program_id ) ) )?;
        let playlist = Playlist::from_files( inner.catalog.file_get_by_program( program.id )? );

        if playlist.is_empty() {
            self.view.message( &format!( "{} has no files", program.title ) );
            return Ok( None );
        }

        let resume = program.current_file.and_then( |id| playlist.position_of( id ) );
        if let ( Some( missing ), None ) = ( program.current_file, resume ) {
            tracing::warn!(
                "Program {} resumes at file {} which is not in its playlist; starting over",
                program.id,
                missing
            );
            inner.catalog.program_set_current_file( program.id, None )?;
            program.current_file = None;
        }

        let index = resume.unwrap_or( 0 );
        inner.playlist = playlist;
        inner.program = Some( program );
        self.play_index_locked( inner, index )?;
        Ok( Some( index ) )
    }


    /// Plays a single file, switching to its program's playlist if needed.
    pub fn play_file( &self, file_id: i64 ) -> Result<(), PlayerError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let file = inner.catalog
            .file_get_by_id( file_id )?
            .ok_or_else( || CatalogError::NotFound( format!( "file {}", file_id ) ) )?;

        if inner.playlist.position_of( file.id ).is_none() {
            match file.program_id {
                Some( program_id ) => {
                    inner.program = inner.catalog.program_get_by_id( program_id )?;
                    inner.playlist = Playlist::from_files( inner.catalog.file_get_by_program( program_id )? );
                }
                None => {
                    inner.program = None;
                    inner.playlist = Playlist::from_files( vec![ file.clone() ] );
                }
            }
        }

        match inner.playlist.position_of( file.id ) {
            Some( index ) => self.play_index_locked( inner, index ),
            None => self.play_file_locked( inner, file ),
        }
    }


    /// Pauses or resumes. Does nothing when stopped.
    pub fn toggle( &self ) -> Result<PlaybackState, PlayerError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        match inner.state {
            PlaybackState::Playing => {
                self.engine_call( inner, |e| e.pause() )?;
                self.save_position_locked( inner )?;
            }
            PlaybackState::Paused => self.engine_call( inner, |e| e.play() )?,
            state => return Ok( state ),
        }

        inner.state = inner.state.on( Trigger::Toggle );
        self.view.status( inner.active.as_ref(), inner.state );
        Ok( inner.state )
    }


    /// Stops playback and forgets the playlist, keeping the resume point.
    pub fn stop( &self ) -> Result<(), PlayerError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let saved = self.save_position_locked( inner );
        if let Err( e ) = inner.engine.stop() {
            tracing::warn!( "Engine did not stop cleanly: {}", e );
        }
        self.halt_locked( inner, Trigger::Stop );
        saved
    }


    /// Moves to the next track of the playlist.
    pub fn next( &self ) -> Result<Step, PlayerError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let target = inner.playlist.next_index();
        self.step_locked( inner, target, "Already at the last track" )
    }


    /// Moves to the previous track of the playlist.
    pub fn previous( &self ) -> Result<Step, PlayerError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let target = inner.playlist.previous_index();
        self.step_locked( inner, target, "Already at the first track" )
    }


    /// Seeks within the active track, clamped to its duration.
    ///
    /// Returns `false` when nothing was done: no active track, or the call
    /// came from the view, on the same thread, while the player was updating
    /// the seek indicator. Seeks from other threads wait for the update.
    pub fn seek( &self, offset: Duration ) -> Result<bool, PlayerError> {
        if SeekGuard::is_held_here( &self.seek_guard ) {
            tracing::debug!( "Ignoring seek raised by a position update" );
            return Ok( false );
        }

        let mut guard = self.lock();
        let inner = &mut *guard;

        if !matches!( inner.state, PlaybackState::Playing | PlaybackState::Paused ) {
            return Ok( false );
        }

        let duration = inner.engine.query_duration();
        let target = duration.map_or( offset, |d| offset.min( d ) );
        self.engine_call( inner, |e| e.seek( target ) )?;

        if let Some( active ) = inner.active.as_mut() {
            inner.catalog.file_set_position( active.id, target, Utc::now() )?;
            active.position = target;
        }

        let _guard = SeekGuard::hold( &self.seek_guard );
        self.view.seek_changed( target, duration );
        Ok( true )
    }


    /// Periodic update: refreshes the seek indicator and writes the position
    /// of the active track through to the catalog.
    pub fn tick( &self ) -> Result<(), PlayerError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.state != PlaybackState::Playing {
            return Ok(());
        }
        let Some( position ) = inner.engine.query_position() else {
            return Ok(());
        };
        let duration = inner.engine.query_duration();

        {
            let _guard = SeekGuard::hold( &self.seek_guard );
            self.view.seek_changed( position, duration );
        }

        if let Some( active ) = inner.active.as_mut() {
            inner.catalog.file_set_position( active.id, position, Utc::now() )?;
            active.position = position;
        }
        Ok(())
    }


    /// Reacts to an asynchronous engine notification.
    ///
    /// Events about a source other than the active one are dropped.
    pub fn handle_engine_event( &self, event: EngineEvent ) -> Result<(), PlayerError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let uri = match &event {
            EngineEvent::EndOfStream { uri } | EngineEvent::Error { uri, .. } => uri,
        };
        if inner.active_uri.as_deref() != Some( uri.as_str() ) {
            tracing::debug!( "Ignoring stale engine event: {:?}", event );
            return Ok(());
        }

        match event {
            EngineEvent::EndOfStream { .. } => self.end_of_stream_locked( inner ),
            EngineEvent::Error { message, .. } => {
                tracing::error!( "Playback failed: {}", message );
                let trigger = match inner.engine.stop() {
                    Ok(()) => Trigger::Error,
                    Err( e ) => {
                        tracing::warn!( "Engine did not stop after error: {}", e );
                        Trigger::Fault
                    }
                };
                self.halt_locked( inner, trigger );
                self.view.message( &format!( "Playback error: {}", message ) );
                Ok(())
            }
        }
    }


    pub fn state( &self ) -> PlaybackState {
        self.lock().state
    }


    /// The track the engine is currently on.
    pub fn current_file( &self ) -> Option<File> {
        self.lock().active.clone()
    }


    pub fn current_index( &self ) -> Option<usize> {
        self.lock().playlist.current_index()
    }


    pub fn program( &self ) -> Option<Program> {
        self.lock().program.clone()
    }


    pub fn playlist( &self ) -> Playlist {
        self.lock().playlist.clone()
    }


    /// Engine position and duration of the active track.
    pub fn position( &self ) -> Option<( Duration, Option<Duration> )> {
        let inner = self.lock();
        inner.active.as_ref()?;
        let position = inner.engine.query_position()?;
        Some(( position, inner.engine.query_duration() ))
    }


    /// Runs `f` against the player's catalog handle.
    pub fn with_catalog<T>( &self, f: impl FnOnce( &Catalog ) -> T ) -> T {
        f( &self.lock().catalog )
    }


    /// Drains engine events on a background thread until the engine goes away.
    pub fn spawn_event_pump( self: &Arc<Self>, events: Receiver<EngineEvent> ) -> JoinHandle<()> {
        let player = Arc::downgrade( self );
        thread::spawn( move || {
            for event in events {
                let Some( player ) = player.upgrade() else {
                    break;
                };
                if let Err( e ) = player.handle_engine_event( event ) {
                    tracing::error!( "Failed to handle engine event: {}", e );
                    player.view.message( &e.to_string() );
                }
            }
            tracing::debug!( "Engine event pump finished" );
        })
    }


    /// Calls `tick` every `interval` until the returned `Ticker` is stopped.
    pub fn spawn_ticker( self: &Arc<Self>, interval: Duration ) -> Ticker {
        let player = Arc::downgrade( self );
        let stop = Arc::new( AtomicBool::new( false ) );
        let stop_flag = Arc::clone( &stop );

        let thread = thread::spawn( move || {
            while !stop_flag.load( Ordering::Relaxed ) {
                thread::park_timeout( interval );
                if stop_flag.load( Ordering::Relaxed ) {
                    break;
                }
                let Some( player ) = player.upgrade() else {
                    break;
                };
                if let Err( e ) = player.tick() {
                    tracing::warn!( "Tick failed: {}", e );
                }
            }
        });

        Ticker { stop, thread: Some( thread ) }
    }


    // ---- helpers; all run with the lock held ----


    fn step_locked(
        &self,
        inner: &mut Inner,
        target: Option<usize>,
        boundary: &str,
    ) -> Result<Step, PlayerError> {
        match target {
            Some( index ) => {
                self.play_index_locked( inner, index )?;
                Ok( Step::Moved( index ) )
            }
            None => {
                let text = if inner.playlist.is_empty() { "Nothing is playing" } else { boundary };
                self.view.message( text );
                Ok( Step::Boundary )
            }
        }
    }


    /// Persists `index` as the program's current file, then plays it.
    fn play_index_locked( &self, inner: &mut Inner, index: usize ) -> Result<(), PlayerError> {
        let Some( file ) = inner.playlist.get( index ).cloned() else {
            return Ok(());
        };

        if let Some( program ) = inner.program.as_mut() {
            inner.catalog.program_set_current_file( program.id, Some( file.id ) )?;
            program.current_file = Some( file.id );
        }
        self.play_file_locked( inner, file )
    }


    fn play_file_locked( &self, inner: &mut Inner, file: File ) -> Result<(), PlayerError> {
        self.save_position_locked( inner )?;
        let file = inner.catalog.file_get_by_id( file.id )?.unwrap_or( file );
        let uri = file_uri( &file.path )?;

        self.engine_call( inner, |e| e.load( &uri ) )?;
        if file.position > Duration::ZERO {
            let offset = file.position;
            self.engine_call( inner, |e| e.seek( offset ) )?;
        }
        self.engine_call( inner, |e| e.play() )?;

        inner.state = inner.state.on( Trigger::Play );
        if let Some( index ) = inner.playlist.position_of( file.id ) {
            inner.playlist.jump_to( index );
        }

        tracing::info!( "Playing {:?} from {:?}", file.path, file.position );
        inner.active_uri = Some( uri );
        inner.active = Some( file );
        self.view.status( inner.active.as_ref(), inner.state );
        Ok(())
    }


    fn end_of_stream_locked( &self, inner: &mut Inner ) -> Result<(), PlayerError> {
        if let Some( finished ) = inner.active.take() {
            inner.catalog.file_set_position( finished.id, Duration::ZERO, Utc::now() )?;
        }
        inner.active_uri = None;

        if let Some( index ) = inner.playlist.next_index() {
            return self.play_index_locked( inner, index );
        }

        if let Some( program ) = &inner.program {
            inner.catalog.program_set_current_file( program.id, None )?;
            tracing::info!( "Finished program {}", program.title );
            self.view.message( &format!( "Finished {}", program.title ) );
        }
        if let Err( e ) = inner.engine.stop() {
            tracing::warn!( "Engine did not stop at end of playlist: {}", e );
        }
        self.halt_locked( inner, Trigger::EndOfStream { has_next: false } );
        Ok(())
    }


    /// Writes the engine position of the active track to the catalog.
    fn save_position_locked( &self, inner: &mut Inner ) -> Result<(), PlayerError> {
        let Some( active ) = inner.active.as_mut() else {
            return Ok(());
        };
        let Some( position ) = inner.engine.query_position() else {
            return Ok(());
        };
        inner.catalog.file_set_position( active.id, position, Utc::now() )?;
        active.position = position;
        Ok(())
    }


    /// Runs an engine command; a failure halts playback.
    fn engine_call<T>(
        &self,
        inner: &mut Inner,
        f: impl FnOnce( &mut dyn MediaEngine ) -> Result<T, EngineError>,
    ) -> Result<T, PlayerError> {
        match f( inner.engine.as_mut() ) {
            Ok( value ) => Ok( value ),
            Err( err ) => {
                tracing::error!( "Engine command failed: {}", err );
                let trigger = match inner.engine.stop() {
                    Ok(()) => Trigger::Error,
                    Err( _ ) => Trigger::Fault,
                };
                self.halt_locked( inner, trigger );
                Err( PlayerError::Engine( err ) )
            }
        }
    }


    /// Drops the playlist and active track and applies `trigger`.
    fn halt_locked( &self, inner: &mut Inner, trigger: Trigger ) {
        inner.playlist.clear();
        inner.program = None;
        inner.active = None;
        inner.active_uri = None;
        inner.state = inner.state.on( trigger );
        self.view.seek_reset();
        self.view.status( None, inner.state );
    }
}


/// Handle on the tick thread; stops it when dropped.
pub struct Ticker {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}


impl Ticker {
    pub fn stop( mut self ) {
        self.shutdown();
    }


    fn shutdown( &mut self ) {
        self.stop.store( true, Ordering::Relaxed );
        if let Some( thread ) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}


impl Drop for Ticker {
    fn drop( &mut self ) {
        self.shutdown();
    }
}


#[cfg( test )]
mod tests {
    use std::path::{ Path, PathBuf };
    use std::sync::{ Barrier, OnceLock, Weak };

    use super::*;


    #[derive( Default )]
    struct EngineLog {
        calls: Vec<String>,
        position: Option<Duration>,
        duration: Option<Duration>,
        fail_load: bool,
        fail_stop: bool,
    }


    struct FakeEngine( Arc<Mutex<EngineLog>> );

    impl FakeEngine {
        fn log( &self ) -> MutexGuard<'_, EngineLog> {
            self.0.lock().unwrap()
        }
    }

    impl MediaEngine for FakeEngine {
        fn load( &mut self, uri: &str ) -> Result<(), EngineError> {
            let mut log = self.log();
            if log.fail_load {
                return Err( EngineError::Open( uri.to_string() ) );
            }
            let name = uri.rsplit( '/' ).next().unwrap_or( uri ).to_string();
            log.calls.push( format!( "load {}", name ) );
            Ok(())
        }

        fn play( &mut self ) -> Result<(), EngineError> {
            self.log().calls.push( "play".into() );
            Ok(())
        }

        fn pause( &mut self ) -> Result<(), EngineError> {
            self.log().calls.push( "pause".into() );
            Ok(())
        }

        fn stop( &mut self ) -> Result<(), EngineError> {
            let mut log = self.log();
            log.calls.push( "stop".into() );
            if log.fail_stop {
                return Err( EngineError::Output( "device gone".into() ) );
            }
            Ok(())
        }

        fn seek( &mut self, offset: Duration ) -> Result<(), EngineError> {
            self.log().calls.push( format!( "seek {}", offset.as_secs() ) );
            Ok(())
        }

        fn query_position( &self ) -> Option<Duration> {
            self.0.lock().unwrap().position
        }

        fn query_duration( &self ) -> Option<Duration> {
            self.0.lock().unwrap().duration
        }
    }


    #[derive( Default )]
    struct RecordingView {
        messages: Mutex<Vec<String>>,
        states: Mutex<Vec<PlaybackState>>,
        seek_resets: Mutex<usize>,
        reentrant: OnceLock<Weak<Player>>,
        reentrant_results: Mutex<Vec<bool>>,
        held_tick: Mutex<Option<Arc<Barrier>>>,
    }

    impl PlayerView for RecordingView {
        fn status( &self, _file: Option<&File>, state: PlaybackState ) {
            self.states.lock().unwrap().push( state );
        }

        fn message( &self, text: &str ) {
            self.messages.lock().unwrap().push( text.to_string() );
        }

        fn seek_changed( &self, _position: Duration, _duration: Option<Duration> ) {
            let gate = self.held_tick.lock().unwrap().take();
            if let Some( gate ) = gate {
                gate.wait();
                thread::sleep( Duration::from_millis( 100 ) );
            }
            if let Some( player ) = self.reentrant.get().and_then( Weak::upgrade ) {
                let applied = player.seek( Duration::from_secs( 1 ) ).unwrap();
                self.reentrant_results.lock().unwrap().push( applied );
            }
        }

        fn seek_reset( &self ) {
            *self.seek_resets.lock().unwrap() += 1;
        }
    }


    struct Fixture {
        player: Arc<Player>,
        engine: Arc<Mutex<EngineLog>>,
        view: Arc<RecordingView>,
        program: Program,
        files: Vec<File>,
    }


    impl Fixture {
        fn calls( &self ) -> Vec<String> {
            self.engine.lock().unwrap().calls.clone()
        }

        fn clear_calls( &self ) {
            self.engine.lock().unwrap().calls.clear();
        }

        fn messages( &self ) -> Vec<String> {
            self.view.messages.lock().unwrap().clone()
        }

        fn stored_program( &self ) -> Program {
            self.player.with_catalog( |c| c.program_get_by_id( self.program.id ).unwrap().unwrap() )
        }

        fn stored_file( &self, index: usize ) -> File {
            self.player.with_catalog( |c| c.file_get_by_id( self.files[ index ].id ).unwrap().unwrap() )
        }

        fn uri( &self, index: usize ) -> String {
            file_uri( &self.files[ index ].path ).unwrap()
        }
    }


    /// A program "Book" with `count` tracks, 01.mp3 onwards.
    fn fixture( count: u32 ) -> Fixture {
        let catalog = Catalog::open_in_memory().unwrap();
        let folder = catalog.folder_add( Path::new( "/books" ) ).unwrap();
        let program = catalog.program_add( "Book", "Author" ).unwrap();
        let files = ( 1..=count )
            .map( |n| {
                let path = PathBuf::from( format!( "/books/{:02}.mp3", n ) );
                let file = catalog.file_add( &path, folder.id, 1, n ).unwrap();
                catalog.file_set_program( file.id, Some( program.id ) ).unwrap();
                file
            })
            .collect();

        let engine = Arc::new( Mutex::new( EngineLog::default() ) );
        let view = Arc::new( RecordingView::default() );
        let player = Arc::new( Player::new(
            catalog,
            Box::new( FakeEngine( Arc::clone( &engine ) ) ),
            view.clone(),
        ));

        Fixture { player, engine, view, program, files }
    }


    #[test]
    fn test_transition_table() {
        use PlaybackState::*;

        assert_eq!( Stopped.on( Trigger::Play ), Playing );
        assert_eq!( Paused.on( Trigger::Play ), Playing );
        assert_eq!( Playing.on( Trigger::Toggle ), Paused );
        assert_eq!( Paused.on( Trigger::Toggle ), Playing );
        assert_eq!( Stopped.on( Trigger::Toggle ), Stopped );
        assert_eq!( Other.on( Trigger::Toggle ), Other );
        assert_eq!( Playing.on( Trigger::Stop ), Stopped );
        assert_eq!( Other.on( Trigger::Stop ), Stopped );
        assert_eq!( Playing.on( Trigger::EndOfStream { has_next: true } ), Playing );
        assert_eq!( Playing.on( Trigger::EndOfStream { has_next: false } ), Stopped );
        assert_eq!( Paused.on( Trigger::Error ), Stopped );
        assert_eq!( Playing.on( Trigger::Fault ), Other );
    }


    #[test]
    fn test_play_program_starts_and_persists_first_track() {
        let fx = fixture( 3 );
        assert_eq!( fx.player.play_program( fx.program.id ).unwrap(), Some( 0 ) );

        assert_eq!( fx.player.state(), PlaybackState::Playing );
        assert_eq!( fx.calls(), vec![ "load 01.mp3", "play" ] );
        assert_eq!( fx.stored_program().current_file, Some( fx.files[ 0 ].id ) );
        assert_eq!( fx.player.current_file().map( |f| f.id ), Some( fx.files[ 0 ].id ) );
    }


    #[test]
    fn test_resume_at_persisted_track() {
        let fx = fixture( 5 );
        fx.player.with_catalog( |c| {
            c.program_set_current_file( fx.program.id, Some( fx.files[ 2 ].id ) ).unwrap()
        });

        assert_eq!( fx.player.play_program( fx.program.id ).unwrap(), Some( 2 ) );
        assert_eq!( fx.player.current_index(), Some( 2 ) );
        assert_eq!( fx.calls()[ 0 ], "load 03.mp3" );
    }


    #[test]
    fn test_resume_within_track() {
        let fx = fixture( 2 );
        fx.player.with_catalog( |c| {
            c.file_set_position( fx.files[ 0 ].id, Duration::from_secs( 42 ), Utc::now() ).unwrap()
        });

        fx.player.play_program( fx.program.id ).unwrap();
        assert_eq!( fx.calls(), vec![ "load 01.mp3", "seek 42", "play" ] );
    }


    #[test]
    fn test_stale_current_file_restarts_from_first_track() {
        let fx = fixture( 3 );
        let other = fx.player.with_catalog( |c| {
            let stray = c.program_add( "Other", "" ).unwrap();
            let folder = c.folder_get_by_path( Path::new( "/books" ) ).unwrap().unwrap();
            let file = c.file_add( Path::new( "/books/stray.mp3" ), folder.id, 0, 0 ).unwrap();
            c.file_set_program( file.id, Some( stray.id ) ).unwrap();
            c.program_set_current_file( fx.program.id, Some( file.id ) ).unwrap();
            file
        });

        assert_eq!( fx.player.play_program( fx.program.id ).unwrap(), Some( 0 ) );
        assert_ne!( fx.stored_program().current_file, Some( other.id ) );
        assert_eq!( fx.stored_program().current_file, Some( fx.files[ 0 ].id ) );
    }


    #[test]
    fn test_empty_program_leaves_state_alone() {
        let fx = fixture( 0 );
        assert_eq!( fx.player.play_program( fx.program.id ).unwrap(), None );
        assert_eq!( fx.player.state(), PlaybackState::Stopped );
        assert!( fx.calls().is_empty() );
        assert_eq!( fx.messages(), vec![ "Book has no files" ] );
    }


    #[test]
    fn test_unknown_program() {
        let fx = fixture( 1 );
        let err = fx.player.play_program( 999 ).unwrap_err();
        assert!( matches!( err, PlayerError::Catalog( CatalogError::NotFound( _ ) ) ) );
    }


    #[test]
    fn test_stop_then_toggle_stays_stopped() {
        let fx = fixture( 2 );
        fx.player.play_program( fx.program.id ).unwrap();
        fx.player.stop().unwrap();
        fx.clear_calls();

        assert_eq!( fx.player.toggle().unwrap(), PlaybackState::Stopped );
        assert_eq!( fx.player.state(), PlaybackState::Stopped );
        assert!( fx.calls().is_empty() );
        assert_eq!( *fx.view.seek_resets.lock().unwrap(), 1 );
    }


    #[test]
    fn test_toggle_pauses_and_resumes() {
        let fx = fixture( 1 );
        fx.player.play_program( fx.program.id ).unwrap();
        fx.clear_calls();

        assert_eq!( fx.player.toggle().unwrap(), PlaybackState::Paused );
        assert_eq!( fx.player.toggle().unwrap(), PlaybackState::Playing );
        assert_eq!( fx.calls(), vec![ "pause", "play" ] );
    }


    #[test]
    fn test_stop_saves_position() {
        let fx = fixture( 1 );
        fx.player.play_program( fx.program.id ).unwrap();
        fx.engine.lock().unwrap().position = Some( Duration::from_secs( 75 ) );

        fx.player.stop().unwrap();
        assert_eq!( fx.stored_file( 0 ).position, Duration::from_secs( 75 ) );
        assert_eq!( fx.stored_program().current_file, Some( fx.files[ 0 ].id ) );
        assert!( fx.player.playlist().is_empty() );
    }


    #[test]
    fn test_next_and_previous_at_boundaries() {
        let fx = fixture( 2 );
        fx.player.play_program( fx.program.id ).unwrap();

        assert_eq!( fx.player.previous().unwrap(), Step::Boundary );
        assert_eq!( fx.player.current_index(), Some( 0 ) );

        assert_eq!( fx.player.next().unwrap(), Step::Moved( 1 ) );
        assert_eq!( fx.stored_program().current_file, Some( fx.files[ 1 ].id ) );

        assert_eq!( fx.player.next().unwrap(), Step::Boundary );
        assert_eq!( fx.player.current_index(), Some( 1 ) );
        assert_eq!( fx.player.state(), PlaybackState::Playing );

        assert_eq!( fx.messages(), vec![ "Already at the first track", "Already at the last track" ] );
    }


    #[test]
    fn test_next_when_nothing_loaded() {
        let fx = fixture( 2 );
        assert_eq!( fx.player.next().unwrap(), Step::Boundary );
        assert_eq!( fx.messages(), vec![ "Nothing is playing" ] );
    }


    #[test]
    fn test_end_of_stream_advances() {
        let fx = fixture( 2 );
        fx.player.play_program( fx.program.id ).unwrap();
        fx.player.with_catalog( |c| {
            c.file_set_position( fx.files[ 0 ].id, Duration::from_secs( 300 ), Utc::now() ).unwrap()
        });

        fx.player.handle_engine_event( EngineEvent::EndOfStream { uri: fx.uri( 0 ) } ).unwrap();

        assert_eq!( fx.player.state(), PlaybackState::Playing );
        assert_eq!( fx.player.current_index(), Some( 1 ) );
        assert_eq!( fx.stored_file( 0 ).position, Duration::ZERO );
        assert_eq!( fx.stored_program().current_file, Some( fx.files[ 1 ].id ) );
    }


    #[test]
    fn test_end_of_stream_at_last_track_stops() {
        let fx = fixture( 2 );
        fx.player.play_program( fx.program.id ).unwrap();
        fx.player.next().unwrap();

        fx.player.handle_engine_event( EngineEvent::EndOfStream { uri: fx.uri( 1 ) } ).unwrap();

        assert_eq!( fx.player.state(), PlaybackState::Stopped );
        assert_eq!( fx.stored_program().current_file, None );
        assert!( fx.player.playlist().is_empty() );
        assert!( fx.player.program().is_none() );
        assert_eq!( fx.messages(), vec![ "Finished Book" ] );
    }


    #[test]
    fn test_stale_end_of_stream_ignored() {
        let fx = fixture( 3 );
        fx.player.play_program( fx.program.id ).unwrap();
        fx.player.next().unwrap();

        fx.player.handle_engine_event( EngineEvent::EndOfStream { uri: fx.uri( 0 ) } ).unwrap();
        assert_eq!( fx.player.current_index(), Some( 1 ) );
    }


    #[test]
    fn test_engine_error_stops() {
        let fx = fixture( 2 );
        fx.player.play_program( fx.program.id ).unwrap();

        let event = EngineEvent::Error { uri: fx.uri( 0 ), message: "bad frame".into() };
        fx.player.handle_engine_event( event ).unwrap();

        assert_eq!( fx.player.state(), PlaybackState::Stopped );
        assert_eq!( fx.messages(), vec![ "Playback error: bad frame" ] );

        // Still usable afterwards.
        fx.player.play_program( fx.program.id ).unwrap();
        assert_eq!( fx.player.state(), PlaybackState::Playing );
    }


    #[test]
    fn test_engine_error_with_failed_stop() {
        let fx = fixture( 1 );
        fx.player.play_program( fx.program.id ).unwrap();
        fx.engine.lock().unwrap().fail_stop = true;

        let event = EngineEvent::Error { uri: fx.uri( 0 ), message: "gone".into() };
        fx.player.handle_engine_event( event ).unwrap();
        assert_eq!( fx.player.state(), PlaybackState::Other );
        assert_eq!( fx.player.toggle().unwrap(), PlaybackState::Other );

        fx.player.stop().unwrap();
        assert_eq!( fx.player.state(), PlaybackState::Stopped );
    }


    #[test]
    fn test_load_failure_halts() {
        let fx = fixture( 1 );
        fx.engine.lock().unwrap().fail_load = true;

        let err = fx.player.play_program( fx.program.id ).unwrap_err();
        assert!( matches!( err, PlayerError::Engine( EngineError::Open( _ ) ) ) );
        assert_eq!( fx.player.state(), PlaybackState::Stopped );
        assert!( fx.player.current_file().is_none() );
    }


    #[test]
    fn test_tick_writes_position() {
        let fx = fixture( 1 );
        fx.player.play_program( fx.program.id ).unwrap();
        fx.engine.lock().unwrap().position = Some( Duration::from_secs( 12 ) );

        fx.player.tick().unwrap();
        let stored = fx.stored_file( 0 );
        assert_eq!( stored.position, Duration::from_secs( 12 ) );
        assert!( stored.last_played.timestamp() > 0 );
    }


    #[test]
    fn test_tick_ignored_when_paused() {
        let fx = fixture( 1 );
        fx.player.play_program( fx.program.id ).unwrap();
        fx.player.toggle().unwrap();
        fx.engine.lock().unwrap().position = Some( Duration::from_secs( 30 ) );

        fx.player.tick().unwrap();
        assert_eq!( fx.stored_file( 0 ).position, Duration::ZERO );
    }


    #[test]
    fn test_tick_does_not_retrigger_seek() {
        let fx = fixture( 1 );
        fx.view.reentrant.set( Arc::downgrade( &fx.player ) ).ok();
        fx.player.play_program( fx.program.id ).unwrap();
        fx.engine.lock().unwrap().position = Some( Duration::from_secs( 5 ) );
        fx.clear_calls();

        fx.player.tick().unwrap();
        assert_eq!( *fx.view.reentrant_results.lock().unwrap(), vec![ false ] );
        assert!( fx.calls().is_empty() );
    }


    #[test]
    fn test_seek_from_another_thread_during_tick() {
        let fx = fixture( 1 );
        fx.player.play_program( fx.program.id ).unwrap();
        fx.engine.lock().unwrap().position = Some( Duration::from_secs( 5 ) );
        fx.clear_calls();

        let gate = Arc::new( Barrier::new( 2 ) );
        *fx.view.held_tick.lock().unwrap() = Some( Arc::clone( &gate ) );

        let player = Arc::clone( &fx.player );
        let ticker = thread::spawn( move || player.tick() );
        gate.wait();

        // The ticker is still inside the view; this call waits for it.
        assert!( fx.player.seek( Duration::from_secs( 50 ) ).unwrap() );
        ticker.join().unwrap().unwrap();

        assert_eq!( fx.calls(), vec![ "seek 50" ] );
        assert_eq!( fx.stored_file( 0 ).position, Duration::from_secs( 50 ) );
    }


    #[test]
    fn test_seek_clamps_to_duration() {
        let fx = fixture( 1 );
        fx.player.play_program( fx.program.id ).unwrap();
        fx.engine.lock().unwrap().duration = Some( Duration::from_secs( 100 ) );
        fx.clear_calls();

        assert!( fx.player.seek( Duration::from_secs( 500 ) ).unwrap() );
        assert_eq!( fx.calls(), vec![ "seek 100" ] );
        assert_eq!( fx.stored_file( 0 ).position, Duration::from_secs( 100 ) );
    }


    #[test]
    fn test_seek_when_stopped() {
        let fx = fixture( 1 );
        assert!( !fx.player.seek( Duration::from_secs( 5 ) ).unwrap() );
        assert!( fx.calls().is_empty() );
    }


    #[test]
    fn test_play_file_joins_its_program() {
        let fx = fixture( 3 );
        fx.player.play_file( fx.files[ 1 ].id ).unwrap();

        assert_eq!( fx.player.current_index(), Some( 1 ) );
        assert_eq!( fx.player.program().map( |p| p.id ), Some( fx.program.id ) );
        assert_eq!( fx.stored_program().current_file, Some( fx.files[ 1 ].id ) );
    }


    #[test]
    fn test_play_unassigned_file() {
        let fx = fixture( 1 );
        let loose = fx.player.with_catalog( |c| {
            let folder = c.folder_get_by_path( Path::new( "/books" ) ).unwrap().unwrap();
            c.file_add( Path::new( "/books/loose.mp3" ), folder.id, 0, 0 ).unwrap()
        });

        fx.player.play_file( loose.id ).unwrap();
        assert_eq!( fx.player.state(), PlaybackState::Playing );
        assert!( fx.player.program().is_none() );
        assert_eq!( fx.player.next().unwrap(), Step::Boundary );
    }


    #[test]
    fn test_event_pump_and_ticker() {
        let fx = fixture( 2 );
        fx.player.play_program( fx.program.id ).unwrap();
        fx.engine.lock().unwrap().position = Some( Duration::from_secs( 3 ) );

        let ( tx, rx ) = std::sync::mpsc::channel();
        let pump = fx.player.spawn_event_pump( rx );
        let ticker = fx.player.spawn_ticker( Duration::from_millis( 5 ) );

        tx.send( EngineEvent::EndOfStream { uri: fx.uri( 0 ) } ).unwrap();
        drop( tx );
        pump.join().unwrap();
        assert_eq!( fx.player.current_index(), Some( 1 ) );

        thread::sleep( Duration::from_millis( 50 ) );
        ticker.stop();
        assert_eq!( fx.stored_file( 1 ).position, Duration::from_secs( 3 ) );
    }
}
