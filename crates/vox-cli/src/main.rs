//! Vox CLI - Console audiobook player

mod cli;
mod settings;
mod view;

use std::io::{ self, BufRead, Write };
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{ Context, Result };
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Args;
use settings::Settings;
use view::{ progress, ConsoleView };

use vox_core::{
    command,
    library::{ self, LibraryError },
    AudioEngine, Catalog, Command, File, Folder, PlaybackState, Player, Step, SymphoniaTagReader,
    TagReader,
};


/// Shortest tick interval accepted from the settings file.
const MIN_TICK: Duration = Duration::from_millis( 100 );


/// A scan worker and what it was asked to do.
enum Job {
    Scan( PathBuf, JoinHandle<Result<Folder, LibraryError>> ),
    Refresh( JoinHandle<Result<Vec<Folder>, LibraryError>> ),
}


impl Job {
    fn is_finished( &self ) -> bool {
        match self {
            Job::Scan( _, handle ) => handle.is_finished(),
            Job::Refresh( handle ) => handle.is_finished(),
        }
    }


    /// Joins a finished worker and describes how it went.
    fn report( self ) -> String {
        match self {
            Job::Scan( root, handle ) => match handle.join() {
                Ok( Ok( folder ) ) => format!( "Scan of {} finished", folder.path.display() ),
                Ok( Err( e ) ) => format!( "Scan of {} failed: {}", root.display(), e ),
                Err( _ ) => format!( "Scan of {} panicked", root.display() ),
            },
            Job::Refresh( handle ) => match handle.join() {
                Ok( Ok( folders ) ) => format!( "Refreshed {} folders", folders.len() ),
                Ok( Err( e ) ) => format!( "Refresh failed: {}", e ),
                Err( _ ) => "Refresh panicked".to_string(),
            },
        }
    }
}


/// Application state.
struct App {
    player: Arc<Player>,
    db_path: PathBuf,
    tags: Arc<dyn TagReader>,
    jobs: Vec<Job>,
}


impl App {
    fn start_scan( &mut self, path: PathBuf ) {
        println!( "Scanning {}...", path.display() );
        let handle = library::spawn_scan( self.db_path.clone(), path.clone(), Arc::clone( &self.tags ) );
        self.jobs.push( Job::Scan( path, handle ) );
    }


    fn start_refresh( &mut self ) {
        println!( "Refreshing all folders..." );
        let handle = library::spawn_refresh( self.db_path.clone(), Arc::clone( &self.tags ) );
        self.jobs.push( Job::Refresh( handle ) );
    }


    /// Reports scan workers that have finished since the last call.
    fn reap_jobs( &mut self ) {
        let ( done, running ): ( Vec<_>, Vec<_> ) = self.jobs.drain( .. ).partition( Job::is_finished );
        self.jobs = running;
        for job in done {
            println!( "{}", job.report() );
        }
    }


    fn execute_command( &mut self, input: &str ) -> bool {
        match Command::parse( input ) {
            Ok( Command::Quit ) => return false,
            Ok( cmd ) => {
                if let Err( e ) = self.run_command( cmd ) {
                    println!( "Error: {:#}", e );
                }
            }
            Err( e ) => println!( "{}", e ),
        }
        true
    }


    fn run_command( &mut self, cmd: Command ) -> Result<()> {
        match cmd {
            Command::Scan { path } => self.start_scan( path ),
            Command::Refresh => self.start_refresh(),
            Command::Programs => {
                let programs = self.player.with_catalog( |c| c.program_get_all() )?;
                let active = self.player.program().map( |p| p.id );
                if programs.is_empty() {
                    println!( "No programs yet; try /scan <dir>" );
                }
                for program in programs {
                    let marker = if Some( program.id ) == active { '*' } else { ' ' };
                    if program.creator.is_empty() {
                        println!( "{}{:>5}  {}", marker, program.id, program.title );
                    } else {
                        println!( "{}{:>5}  {} by {}", marker, program.id, program.title, program.creator );
                    }
                }
            }
            Command::Files { program } => {
                let files = self.player.with_catalog( |c| c.file_get_by_program( program ) )?;
                self.print_files( &files );
            }
            Command::Unassigned => {
                let files = self.player.with_catalog( |c| c.file_get_unassigned() )?;
                self.print_files( &files );
            }
            Command::Assign { file, program } => {
                self.player.with_catalog( |c| c.file_set_program( file, program ) )?;
                match program {
                    Some( program ) => println!( "File {} moved to program {}", file, program ),
                    None => println!( "File {} unassigned", file ),
                }
            }
            Command::Play { program } => {
                self.player.play_program( program )?;
            }
            Command::PlayFile { file } => self.player.play_file( file )?,
            Command::Toggle => {
                if self.player.toggle()? == PlaybackState::Stopped {
                    println!( "Nothing is playing" );
                }
            }
            Command::Stop => self.player.stop()?,
            Command::Next => {
                self.player.next()?;
            }
            Command::Prev => {
                if let Step::Moved( index ) = self.player.previous()? {
                    tracing::debug!( "Moved back to track {}", index + 1 );
                }
            }
            Command::Seek { position } => {
                if !self.player.seek( position )? {
                    println!( "Nothing is playing" );
                }
            }
            Command::Status => self.print_status(),
            Command::Help => println!( "{}", command::help_text() ),
            Command::Quit => {}
        }
        Ok(())
    }


    fn print_files( &self, files: &[File] ) {
        if files.is_empty() {
            println!( "No files" );
            return;
        }
        let active = self.player.current_file().map( |f| f.id );
        for file in files {
            let marker = if Some( file.id ) == active { '>' } else { ' ' };
            println!(
                "{}{:>6}  {}.{:02}  {}  [{}]",
                marker,
                file.id,
                file.ord1,
                file.ord2,
                file.display_title(),
                command::format_time( file.position )
            );
        }
    }


    fn print_status( &self ) {
        let state = self.player.state();
        let Some( file ) = self.player.current_file() else {
            println!( "[{}]", state.label() );
            return;
        };

        let program = self.player.program()
            .map( |p| format!( "{}: ", p.title ) )
            .unwrap_or_default();
        let track = match ( self.player.current_index(), self.player.playlist().len() ) {
            ( Some( index ), len ) if len > 1 => format!( " ({}/{})", index + 1, len ),
            _ => String::new(),
        };
        let at = self.player.position()
            .map( |( position, duration )| format!( "  {}", progress( position, duration ) ) )
            .unwrap_or_default();

        println!( "[{}] {}{}{}{}", state.label(), program, file.display_title(), track, at );
        if !self.jobs.is_empty() {
            println!( "{} scan(s) running", self.jobs.len() );
        }
    }
}


/// Sets up stderr logging; `RUST_LOG` wins over flags and settings.
fn init_tracing( level: &str ) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else( |_| EnvFilter::new( level ) );
    tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_writer( io::stderr )
        .init();
}


fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load();
    let level = args.log_level()
        .map( str::to_string )
        .or_else( || settings.as_ref().ok().map( |s| s.log_level.clone() ) )
        .unwrap_or_else( || "info".to_string() );
    init_tracing( &level );

    let settings = settings.unwrap_or_else( |e| {
        tracing::warn!( "Using default settings: {:#}", e );
        Settings::default()
    });

    let db_path = args.db.clone()
        .or_else( || settings.database.clone() )
        .or_else( Catalog::default_path )
        .context( "No data directory available; pass --db <PATH>" )?;
    let catalog = Catalog::open( &db_path )
        .with_context( || format!( "Failed to open catalog at {}", db_path.display() ) )?;
    tracing::info!( "Catalog: {}", db_path.display() );

    let ( engine, events ) = AudioEngine::new();
    let player = Arc::new( Player::new( catalog, Box::new( engine ), Arc::new( ConsoleView ) ) );
    let pump = player.spawn_event_pump( events );
    let tick = Duration::from_millis( settings.tick_interval_ms ).max( MIN_TICK );
    let ticker = player.spawn_ticker( tick );

    let mut app = App {
        player,
        db_path,
        tags: Arc::new( SymphoniaTagReader ),
        jobs: Vec::new(),
    };

    for dir in &args.scan {
        app.start_scan( dir.clone() );
    }
    if args.refresh {
        app.start_refresh();
    }
    if let Some( program ) = args.play {
        if let Err( e ) = app.player.play_program( program ) {
            println!( "Error: {}", e );
        }
    }

    println!( "vox {} - type /help for commands", env!( "CARGO_PKG_VERSION" ) );

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        app.reap_jobs();
        print!( "> " );
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line( &mut line )? == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        if !app.execute_command( &line ) {
            break;
        }
    }

    if let Err( e ) = app.player.stop() {
        tracing::warn!( "Failed to save position on exit: {}", e );
    }
    ticker.stop();

    app.reap_jobs();
    if !app.jobs.is_empty() {
        tracing::info!( "Leaving {} scan(s) unfinished; /refresh resumes them", app.jobs.len() );
    }

    drop( app );
    let _ = pump.join();
    Ok(())
}
