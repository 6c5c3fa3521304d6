//! Local-file media engine
//!
//! Decodes with Symphonia on a dedicated thread, resamples with rubato when
//! the device rate differs, and plays through cpal. The decode thread owns
//! the output stream for its whole life and reports end-of-stream and
//! failures on the engine's event channel.

use std::path::PathBuf;
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::sync::mpsc::{ self, Receiver, Sender, SyncSender };
use std::sync::Arc;
use std::thread::{ self, JoinHandle };
use std::time::Duration;

use rubato::{ FastFixedOut, PolynomialDegree, Resampler };

use crate::decoder::Decoder;
use crate::engine::{ uri_to_path, EngineError, EngineEvent, MediaEngine };
use crate::output::{ AudioOutput, SampleBuffer };


/// Frames produced per resampler call.
const RESAMPLE_CHUNK: usize = 1024;


/// A running decode thread and what the engine needs to talk to it.
struct Playback {
    stop_flag: Arc<AtomicBool>,
    buffer: Arc<SampleBuffer>,
    thread: Option<JoinHandle<()>>,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
    start_at: Duration,
    duration: Option<Duration>,
}


impl Playback {
    fn position( &self ) -> Duration {
        let frames = self.frames.load( Ordering::Relaxed );
        self.start_at + Duration::from_secs_f64( frames as f64 / self.sample_rate.max( 1 ) as f64 )
    }
}


impl Drop for Playback {
    fn drop( &mut self ) {
        self.stop_flag.store( true, Ordering::Relaxed );
        self.buffer.clear();
        if let Some( thread ) = self.thread.take() {
            let _ = thread.join();
        }
    }
}


/// Everything the decode thread takes ownership of.
struct DecodeJob {
    decoder: Decoder,
    uri: String,
    stop_flag: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    events: Sender<EngineEvent>,
    ready: SyncSender<Result<Arc<SampleBuffer>, EngineError>>,
}


/// Media engine for `file://` sources on the default audio device.
pub struct AudioEngine {
    events: Sender<EngineEvent>,
    source: Option<( String, PathBuf )>,
    start_at: Duration,
    playback: Option<Playback>,
}


impl AudioEngine {
    /// Creates an idle engine and the receiving end of its event channel.
    pub fn new() -> ( Self, Receiver<EngineEvent> ) {
        let ( events, rx ) = mpsc::channel();
        let engine = Self {
            events,
            source: None,
            start_at: Duration::ZERO,
            playback: None,
        };
        ( engine, rx )
    }


    /// Opens the loaded source at `offset` and starts its decode thread.
    fn start( &mut self, offset: Duration, paused: bool ) -> Result<(), EngineError> {
        self.playback = None;

        let ( uri, path ) = self.source.clone().ok_or( EngineError::NoSource )?;
        let mut decoder = Decoder::open( &path )
            .map_err( |e| EngineError::Open( format!( "{}: {}", path.display(), e ) ) )?;
        if offset > Duration::ZERO {
            decoder.seek( offset ).map_err( |e| EngineError::Seek( e.to_string() ) )?;
        }

        let sample_rate = decoder.sample_rate();
        let duration = decoder.duration();
        let stop_flag = Arc::new( AtomicBool::new( false ) );
        let frames = Arc::new( AtomicU64::new( 0 ) );
        let ( ready, started ) = mpsc::sync_channel( 1 );

        let job = DecodeJob {
            decoder,
            uri,
            stop_flag: Arc::clone( &stop_flag ),
            frames: Arc::clone( &frames ),
            events: self.events.clone(),
            ready,
        };

        let thread = thread::Builder::new()
            .name( "vox-decode".into() )
            .spawn( move || decode_thread( job ) )
            .map_err( |e| EngineError::Output( e.to_string() ) )?;

        let buffer = match started.recv() {
            Ok( Ok( buffer ) ) => buffer,
            Ok( Err( e ) ) => {
                let _ = thread.join();
                return Err( e );
            }
            Err( _ ) => {
                let _ = thread.join();
                return Err( EngineError::Output( "decode thread exited during startup".into() ) );
            }
        };
        buffer.set_paused( paused );

        tracing::debug!( "Started {:?} at {:?}", path, offset );

        self.playback = Some( Playback {
            stop_flag,
            buffer,
            thread: Some( thread ),
            frames,
            sample_rate,
            start_at: offset,
            duration,
        });
        Ok(())
    }
}


impl MediaEngine for AudioEngine {
    fn load( &mut self, uri: &str ) -> Result<(), EngineError> {
        self.playback = None;
        self.start_at = Duration::ZERO;
        let path = uri_to_path( uri )?;
        self.source = Some(( uri.to_string(), path ));
        Ok(())
    }


    fn play( &mut self ) -> Result<(), EngineError> {
        match &self.playback {
            Some( playback ) => {
                playback.buffer.set_paused( false );
                Ok(())
            }
            None => self.start( self.start_at, false ),
        }
    }


    fn pause( &mut self ) -> Result<(), EngineError> {
        if let Some( playback ) = &self.playback {
            playback.buffer.set_paused( true );
        }
        Ok(())
    }


    fn stop( &mut self ) -> Result<(), EngineError> {
        self.playback = None;
        self.start_at = Duration::ZERO;
        Ok(())
    }


    fn seek( &mut self, offset: Duration ) -> Result<(), EngineError> {
        if self.source.is_none() {
            return Err( EngineError::NoSource );
        }
        match &self.playback {
            Some( playback ) => {
                let paused = playback.buffer.is_paused();
                self.start( offset, paused )
            }
            None => {
                self.start_at = offset;
                Ok(())
            }
        }
    }


    fn query_position( &self ) -> Option<Duration> {
        self.playback.as_ref().map( Playback::position )
    }


    fn query_duration( &self ) -> Option<Duration> {
        self.playback.as_ref().and_then( |p| p.duration )
    }
}


/// Body of the decode thread.
///
/// Opens the device, reports startup on `ready`, then feeds the sample buffer
/// until end of stream, a failure, or the stop flag.
fn decode_thread( job: DecodeJob ) {
    let DecodeJob { mut decoder, uri, stop_flag, frames, events, ready } = job;
    let source_rate = decoder.sample_rate();
    let channels = decoder.channels();

    let setup = AudioOutput::new( source_rate, channels )
        .and_then( |( output, buffer )| output.play().map( |_| ( output, buffer ) ) )
        .map_err( |e| EngineError::Output( e.to_string() ) );
    let ( output, buffer ) = match setup {
        Ok( pair ) => pair,
        Err( e ) => {
            let _ = ready.send( Err( e ) );
            return;
        }
    };

    let target_rate = output.sample_rate();
    let mut resampler = if source_rate != target_rate {
        tracing::info!( "Resampling: {} Hz -> {} Hz", source_rate, target_rate );
        match FastFixedOut::<f32>::new(
            target_rate as f64 / source_rate as f64,
            2.0,
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK,
            channels,
        ) {
            Ok( resampler ) => Some( resampler ),
            Err( e ) => {
                let _ = ready.send( Err( EngineError::Output( format!( "Failed to create resampler: {}", e ) ) ) );
                return;
            }
        }
    } else {
        None
    };

    if ready.send( Ok( Arc::clone( &buffer ) ) ).is_err() {
        return;
    }

    let mut pending: Vec<Vec<f32>> = vec![ Vec::new(); channels ];
    // Keep about 50ms decoded ahead of the device.
    let ahead = source_rate as usize * channels / 20;

    loop {
        if stop_flag.load( Ordering::Relaxed ) {
            return;
        }
        if buffer.is_paused() {
            thread::sleep( Duration::from_millis( 10 ) );
            continue;
        }
        if buffer.len() > ahead {
            thread::sleep( Duration::from_millis( 5 ) );
            continue;
        }

        match decoder.decode_next() {
            Ok( Some( samples ) ) => {
                frames.fetch_add( ( samples.len() / channels ) as u64, Ordering::Relaxed );
                let out = match resampler.as_mut() {
                    Some( resampler ) => resample( resampler, &mut pending, &samples, channels ),
                    None => samples,
                };
                feed( &buffer, &out, &stop_flag );
            }
            Ok( None ) => {
                if let Some( resampler ) = resampler.as_mut() {
                    if !pending[ 0 ].is_empty() {
                        match resampler.process_partial( Some( pending.as_slice() ), None ) {
                            Ok( tail ) => feed( &buffer, &interleave( &tail ), &stop_flag ),
                            Err( e ) => tracing::warn!( "Final resample failed: {}", e ),
                        }
                    }
                }
                while !buffer.is_empty() && !stop_flag.load( Ordering::Relaxed ) {
                    thread::sleep( Duration::from_millis( 10 ) );
                }
                if !stop_flag.load( Ordering::Relaxed ) {
                    tracing::debug!( "End of stream: {}", uri );
                    let _ = events.send( EngineEvent::EndOfStream { uri } );
                }
                return;
            }
            Err( e ) => {
                tracing::error!( "Decode failed for {}: {}", uri, e );
                if !stop_flag.load( Ordering::Relaxed ) {
                    let _ = events.send( EngineEvent::Error { uri, message: e.to_string() } );
                }
                return;
            }
        }
    }
}


/// Pushes interleaved samples, waiting for room, until done or stopped.
fn feed( buffer: &SampleBuffer, samples: &[f32], stop_flag: &AtomicBool ) {
    let mut offset = 0;
    while offset < samples.len() && !stop_flag.load( Ordering::Relaxed ) {
        let pushed = buffer.push( &samples[ offset.. ] );
        offset += pushed;
        if pushed == 0 {
            thread::sleep( Duration::from_millis( 5 ) );
        }
    }
}


/// Queues interleaved input and returns whatever full chunks resample out.
fn resample(
    resampler: &mut FastFixedOut<f32>,
    pending: &mut [Vec<f32>],
    samples: &[f32],
    channels: usize,
) -> Vec<f32> {
    for frame in samples.chunks_exact( channels ) {
        for ( ch, sample ) in frame.iter().enumerate() {
            pending[ ch ].push( *sample );
        }
    }

    let mut out = Vec::new();
    while pending[ 0 ].len() >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let chunk: Vec<Vec<f32>> = pending
            .iter_mut()
            .map( |ch| ch.drain( ..needed ).collect() )
            .collect();
        match resampler.process( &chunk, None ) {
            Ok( resampled ) => out.extend( interleave( &resampled ) ),
            Err( e ) => {
                tracing::warn!( "Resample failed, dropping {} frames: {}", needed, e );
                break;
            }
        }
    }
    out
}


/// Planar to interleaved.
fn interleave( planar: &[Vec<f32>] ) -> Vec<f32> {
    let frames = planar.first().map_or( 0, Vec::len );
    let mut out = Vec::with_capacity( frames * planar.len() );
    for i in 0..frames {
        for channel in planar {
            out.push( channel[ i ] );
        }
    }
    out
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_interleave() {
        let planar = vec![ vec![ 1.0, 2.0 ], vec![ 3.0, 4.0 ] ];
        assert_eq!( interleave( &planar ), vec![ 1.0, 3.0, 2.0, 4.0 ] );
        assert!( interleave( &[] ).is_empty() );
    }


    #[test]
    fn test_seek_before_play_sets_start() {
        let ( mut engine, _rx ) = AudioEngine::new();
        assert!( matches!( engine.seek( Duration::from_secs( 5 ) ), Err( EngineError::NoSource ) ) );

        engine.load( "file:///nowhere/missing.mp3" ).unwrap();
        engine.seek( Duration::from_secs( 5 ) ).unwrap();
        assert_eq!( engine.start_at, Duration::from_secs( 5 ) );
        assert_eq!( engine.query_position(), None );
    }


    #[test]
    fn test_play_missing_file_fails_without_event() {
        let ( mut engine, rx ) = AudioEngine::new();
        engine.load( "file:///nowhere/missing.mp3" ).unwrap();
        assert!( matches!( engine.play(), Err( EngineError::Open( _ ) ) ) );
        assert!( rx.try_recv().is_err() );
        engine.stop().unwrap();
    }


    #[test]
    fn test_load_rejects_non_file_uri() {
        let ( mut engine, _rx ) = AudioEngine::new();
        assert!( matches!( engine.load( "http://example.com/a.mp3" ), Err( EngineError::Uri( _ ) ) ) );
    }
}
