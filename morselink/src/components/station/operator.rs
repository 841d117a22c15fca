use crate::{
    errors::DeviceError,
    messages::control::resolution::{Resolution, RESOLUTION_OPTIONS},
};
use chrono::{DateTime, Utc};
use image::GenericImageView;
use std::{
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver, Sender, TryRecvError},
    thread::JoinHandle,
};
use tracing::{debug, info, warn};

/// What the operator wants done at the end of a ready iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// End the session.
    Quit,
    /// Switch the field camera to another resolution.
    ChangeResolution(Resolution),
    /// Keep going.
    Continue,
}

/// Presentation of received frames and the source of per iteration
/// directives. Neither call may block the control loop.
pub trait Operator {
    /// Show a received frame. An empty frame means the field capture failed.
    fn present(&mut self, frame: &[u8]);

    /// Next pending directive, `Continue` when there is none.
    fn directive(&mut self) -> Directive;
}

/// Operator driven from a terminal: frames are written to disk and keys
/// typed on stdin become directives. Frames are decoded and saved on a
/// writer thread; dropping the operator waits for it to finish.
pub struct ConsoleOperator {
    directives: Receiver<Directive>,
    frames: Option<Sender<(usize, Vec<u8>)>>,
    writer: Option<JoinHandle<()>>,
    presented: usize,
}

impl ConsoleOperator {
    /// Operator reading directives from stdin.
    ///
    /// * `frame_dir`: directory received frames are saved to.
    pub fn new(frame_dir: Option<PathBuf>) -> Result<Self, DeviceError> {
        Self::with_input(frame_dir, BufReader::new(std::io::stdin()))
    }

    /// Operator reading directives from any line source. The source is read
    /// on its own thread so a blocked read never stalls the session.
    ///
    /// * `frame_dir`: directory received frames are saved to.
    /// * `input`: line oriented command source.
    pub fn with_input<R>(frame_dir: Option<PathBuf>, input: R) -> Result<Self, DeviceError>
    where
        R: BufRead + Send + 'static,
    {
        if let Some(dir) = &frame_dir {
            std::fs::create_dir_all(dir).map_err(|source| DeviceError::Access {
                path: dir.clone(),
                source,
            })?;
        }
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || read_directives(input, tx));

        let (frames, pending) = mpsc::channel::<(usize, Vec<u8>)>();
        let writer = std::thread::spawn(move || {
            for (index, frame) in pending {
                store_frame(frame_dir.as_deref(), index, &frame);
            }
        });
        print_help();
        Ok(Self {
            directives: rx,
            frames: Some(frames),
            writer: Some(writer),
            presented: 0,
        })
    }

    /// Number of frames presented so far.
    pub fn presented(&self) -> usize {
        self.presented
    }
}

impl Operator for ConsoleOperator {
    fn present(&mut self, frame: &[u8]) {
        self.presented += 1;
        if frame.is_empty() {
            warn!("Field unit sent an empty frame");
            return;
        }
        let sent = self
            .frames
            .as_ref()
            .map(|frames| frames.send((self.presented, frame.to_vec())));
        if !matches!(sent, Some(Ok(()))) {
            warn!("Frame writer has stopped, frame dropped");
        }
    }

    fn directive(&mut self) -> Directive {
        match self.directives.try_recv() {
            Ok(directive) => directive,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Directive::Continue,
        }
    }
}

impl Drop for ConsoleOperator {
    fn drop(&mut self) {
        self.frames.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                warn!("Frame writer panicked");
            }
        }
    }
}

/// Decode a received frame and save it as png when a directory is set.
fn store_frame(frame_dir: Option<&Path>, index: usize, frame: &[u8]) {
    let image = match image::load_from_memory(frame) {
        Ok(image) => image,
        Err(e) => {
            warn!(bytes = frame.len(), "Received frame is not an image {e}");
            return;
        }
    };
    let (width, height) = image.dimensions();
    debug!(width, height, "Frame received");

    if let Some(dir) = frame_dir {
        let path = dir.join(frame_file_name(Utc::now(), index));
        if let Err(e) = image.save(&path) {
            warn!(?path, "Failed to save frame {e}");
        }
    }
}

/// File name a frame is saved under.
pub(crate) fn frame_file_name(datetime: DateTime<Utc>, index: usize) -> String {
    format!("{}-{index:06}.png", datetime.format("%Y%m%dT%H%M%S%.3f"))
}

fn print_help() {
    println!("Commands: q to quit, r to change the camera resolution");
}

fn print_menu() {
    println!("Choose a resolution:");
    for (i, option) in RESOLUTION_OPTIONS.iter().enumerate() {
        println!("  {}) {option}", i + 1);
    }
    let _ = std::io::stdout().flush();
}

/// Menu entry for a typed choice, `1` to `4`.
pub fn parse_choice(line: &str) -> Option<Resolution> {
    let choice: usize = line.trim().parse().ok()?;
    RESOLUTION_OPTIONS.get(choice.checked_sub(1)?).copied()
}

/// Turn typed lines into directives until the input ends or the receiver
/// goes away. `q` quits, `r` opens the resolution menu and waits for a
/// valid choice, anything else is ignored.
fn read_directives<R: BufRead>(input: R, tx: Sender<Directive>) {
    let mut lines = input.lines();
    while let Some(Ok(line)) = lines.next() {
        let directive = match line.trim() {
            "q" => Directive::Quit,
            "r" => {
                print_menu();
                let mut chosen = None;
                while let Some(Ok(choice)) = lines.next() {
                    chosen = parse_choice(&choice);
                    if chosen.is_some() {
                        break;
                    }
                    println!("Pick a number between 1 and {}", RESOLUTION_OPTIONS.len());
                }
                match chosen {
                    Some(resolution) => {
                        info!(%resolution, "Resolution change requested");
                        Directive::ChangeResolution(resolution)
                    }
                    None => return,
                }
            }
            _ => continue,
        };
        if tx.send(directive).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::{Rgb, RgbImage};
    use rstest::rstest;
    use std::{io::Cursor, time::Duration};
    use uuid::Uuid;

    /// Wait for the reader thread to forward everything it will forward.
    fn collect(operator: &mut ConsoleOperator, expected: usize) -> Vec<Directive> {
        let mut directives = Vec::new();
        for _ in 0..200 {
            match operator.directive() {
                Directive::Continue if directives.len() >= expected => break,
                Directive::Continue => std::thread::sleep(Duration::from_millis(5)),
                directive => directives.push(directive),
            }
        }
        directives
    }

    #[rstest]
    #[case("1", Some(Resolution::new(176, 144)))]
    #[case(" 3\n", Some(Resolution::new(800, 600)))]
    #[case("4", Some(Resolution::new(1184, 656)))]
    #[case("0", None)]
    #[case("5", None)]
    #[case("two", None)]
    fn test_menu_choice(#[case] line: &str, #[case] expected: Option<Resolution>) {
        assert_eq!(parse_choice(line), expected);
    }

    #[test]
    fn test_typed_commands_become_directives() {
        let input = Cursor::new("hello\nr\n9\n2\n\nq\n");
        let mut operator = ConsoleOperator::with_input(None, input).unwrap();
        assert_eq!(
            collect(&mut operator, 2),
            vec![
                Directive::ChangeResolution(Resolution::new(160, 120)),
                Directive::Quit
            ]
        );
        assert_eq!(operator.directive(), Directive::Continue);
    }

    #[test]
    fn test_no_input_continues() {
        let mut operator = ConsoleOperator::with_input(None, Cursor::new("")).unwrap();
        assert_eq!(operator.directive(), Directive::Continue);
    }

    #[test]
    fn test_frames_are_saved_with_timestamp() {
        let dir = std::env::temp_dir().join(format!("morselink-frames-{}", Uuid::new_v4()));
        let mut operator = ConsoleOperator::with_input(Some(dir.clone()), Cursor::new("")).unwrap();

        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 8, Rgb([10, 200, 30])))
            .write_to(&mut Cursor::new(&mut jpeg), image::ImageOutputFormat::Jpeg(90))
            .unwrap();

        operator.present(&jpeg);
        operator.present(&[]);
        operator.present(b"garbage");
        assert_eq!(operator.presented(), 3);
        drop(operator);

        let saved: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert_eq!(saved.len(), 1);
    }

    #[test]
    fn test_frame_file_name() {
        let datetime = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            frame_file_name(datetime, 12),
            "20240309T140507.000-000012.png"
        );
    }
}
