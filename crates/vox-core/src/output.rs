//! Audio output via cpal
//!
//! A bounded sample queue fed by the decode thread and drained by the device
//! callback, plus the stream that owns the callback.

use std::collections::VecDeque;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Mutex, MutexGuard };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use thiserror::Error;


/// Errors that can occur with audio output.
#[derive( Debug, Error )]
pub enum OutputError {
    #[error( "No output device available" )]
    NoDevice,

    #[error( "Failed to get stream config: {0}" )]
    StreamConfig( String ),

    #[error( "Failed to build output stream: {0}" )]
    BuildStream( String ),

    #[error( "Failed to play stream: {0}" )]
    PlayStream( String ),
}


/// Sample queue shared between the decode thread and the device callback.
///
/// Remixes from the source channel count to the device channel count on the
/// way out.
pub struct SampleBuffer {
    queue: Mutex<VecDeque<f32>>,
    capacity: usize,
    paused: AtomicBool,
    source_channels: usize,
    output_channels: usize,
}


impl SampleBuffer {
    pub fn new( capacity: usize, source_channels: usize, output_channels: usize ) -> Self {
        Self {
            queue: Mutex::new( VecDeque::with_capacity( capacity ) ),
            capacity,
            paused: AtomicBool::new( false ),
            source_channels: source_channels.max( 1 ),
            output_channels: output_channels.max( 1 ),
        }
    }


    fn queue( &self ) -> MutexGuard<'_, VecDeque<f32>> {
        self.queue.lock().unwrap_or_else( |e| e.into_inner() )
    }


    /// Queues as many samples as fit; returns how many were taken.
    pub fn push( &self, samples: &[f32] ) -> usize {
        let mut queue = self.queue();
        let take = samples.len().min( self.capacity.saturating_sub( queue.len() ) );
        queue.extend( &samples[ ..take ] );
        take
    }


    /// Fills `output` with device frames, padding with silence.
    pub fn pop( &self, output: &mut [f32] ) {
        output.fill( 0.0 );
        if self.paused.load( Ordering::Relaxed ) {
            return;
        }

        let src = self.source_channels;
        let out = self.output_channels;
        let mut queue = self.queue();
        let frames = ( output.len() / out ).min( queue.len() / src );

        let mut frame = Vec::with_capacity( src );
        for dst in output.chunks_exact_mut( out ).take( frames ) {
            frame.clear();
            frame.extend( queue.drain( ..src ) );

            if src == 2 && out == 1 {
                dst[ 0 ] = ( frame[ 0 ] + frame[ 1 ] ) * 0.5;
            } else {
                for ( ch, sample ) in dst.iter_mut().enumerate() {
                    *sample = frame[ ch.min( src - 1 ) ];
                }
            }
        }
    }


    pub fn is_empty( &self ) -> bool {
        self.queue().is_empty()
    }


    pub fn len( &self ) -> usize {
        self.queue().len()
    }


    pub fn clear( &self ) {
        self.queue().clear();
    }


    pub fn set_paused( &self, paused: bool ) {
        self.paused.store( paused, Ordering::Relaxed );
    }


    pub fn is_paused( &self ) -> bool {
        self.paused.load( Ordering::Relaxed )
    }
}


/// An open device stream. Not `Send`: keep it on the thread that created it.
pub struct AudioOutput {
    stream: cpal::Stream,
    sample_rate: u32,
}


impl AudioOutput {
    /// Opens the default device, preferring a config that matches the source.
    ///
    /// Returns the stream and the buffer its callback drains.
    pub fn new(
        source_sample_rate: u32,
        source_channels: usize,
    ) -> Result<( Self, Arc<SampleBuffer> ), OutputError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or( OutputError::NoDevice )?;

        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
            .collect();

        let rate_fits = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate().0 <= source_sample_rate && c.max_sample_rate().0 >= source_sample_rate
        };

        let config = match supported
            .iter()
            .find( |c| rate_fits( c ) && usize::from( c.channels() ) == source_channels )
            .or_else( || supported.iter().find( |c| rate_fits( c ) ) )
        {
            Some( range ) => range.clone()
                .with_sample_rate( cpal::SampleRate( source_sample_rate ) )
                .config(),
            None => device
                .default_output_config()
                .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
                .config(),
        };

        tracing::info!(
            "Audio output: {} Hz, {} channels (source {} Hz, {} channels)",
            config.sample_rate.0,
            config.channels,
            source_sample_rate,
            source_channels
        );

        // About half a second of audio.
        let capacity = source_sample_rate as usize * source_channels / 2;
        let buffer = Arc::new( SampleBuffer::new(
            capacity,
            source_channels,
            usize::from( config.channels ),
        ));
        let feed = Arc::clone( &buffer );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| feed.pop( data ),
                |err| tracing::error!( "Audio output error: {}", err ),
                None,
            )
            .map_err( |e| OutputError::BuildStream( e.to_string() ) )?;

        Ok(( Self { stream, sample_rate: config.sample_rate.0 }, buffer ))
    }


    /// Starts audio output.
    pub fn play( &self ) -> Result<(), OutputError> {
        self.stream
            .play()
            .map_err( |e| OutputError::PlayStream( e.to_string() ) )
    }


    /// Gets the device sample rate.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_push_respects_capacity() {
        let buffer = SampleBuffer::new( 4, 2, 2 );
        assert_eq!( buffer.push( &[ 1.0; 6 ] ), 4 );
        assert_eq!( buffer.len(), 4 );
        assert_eq!( buffer.push( &[ 1.0 ] ), 0 );
    }


    #[test]
    fn test_pop_mono_to_stereo() {
        let buffer = SampleBuffer::new( 16, 1, 2 );
        buffer.push( &[ 0.1, 0.2 ] );
        let mut out = [ 9.0; 6 ];
        buffer.pop( &mut out );
        assert_eq!( out, [ 0.1, 0.1, 0.2, 0.2, 0.0, 0.0 ] );
        assert!( buffer.is_empty() );
    }


    #[test]
    fn test_pop_stereo_to_mono() {
        let buffer = SampleBuffer::new( 16, 2, 1 );
        buffer.push( &[ 0.2, 0.4, 1.0, 0.0 ] );
        let mut out = [ 0.0; 2 ];
        buffer.pop( &mut out );
        assert!( ( out[ 0 ] - 0.3 ).abs() < 1e-6 );
        assert!( ( out[ 1 ] - 0.5 ).abs() < 1e-6 );
    }


    #[test]
    fn test_paused_outputs_silence() {
        let buffer = SampleBuffer::new( 16, 2, 2 );
        buffer.push( &[ 0.5; 4 ] );
        buffer.set_paused( true );
        let mut out = [ 1.0; 4 ];
        buffer.pop( &mut out );
        assert_eq!( out, [ 0.0; 4 ] );
        assert_eq!( buffer.len(), 4 );
    }
}
