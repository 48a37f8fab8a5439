//! Parallel compression pool.
//!
//! The producer (the `write` method) chops input into fixed-size work
//! units and submits each to a bounded task queue; in lock-step the unit's
//! result channel is enqueued on a bounded output queue. Lazily spawned
//! workers compress units into local buffers; a single output thread pulls
//! result channels in submission order and writes to the underlying
//! writer, so the emitted byte stream is identical to a serial execution
//! over the same partitioning. An error channel of capacity one propagates
//! the first failure; a cancellation token drains the workers.
//!
//! Two mutually exclusive parallelism levels exist: XZ-block parallelism
//! (each unit becomes a complete block with its own check) and LZMA2-chunk
//! parallelism (each unit becomes a dict-reset chunk run inside one
//! stream).

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, trace};

use crate::checksum::CheckKind;
use crate::lzma2::{Lzma2Writer, CONTROL_EOS};
use crate::options::{LzmaOptions, WriterOptions};
use crate::xz::index::{self, IndexRecord};
use crate::xz::stream::{self, StreamFlags};
use crate::xz::writer::compress_block;
use crate::{Error, Result};

/// A compressed work unit as produced by a worker.
struct Unit {
    bytes: Vec<u8>,
    record: Option<IndexRecord>,
}

struct Task {
    data: Vec<u8>,
    result_tx: Sender<Result<Unit>>,
}

enum Ctl {
    Unit(Receiver<Result<Unit>>),
    Flush(Sender<()>),
    Finish,
}

/// What a worker does with one unit.
#[derive(Clone)]
enum Job {
    /// Build a complete XZ block: header, body, padding, check.
    XzBlock {
        lzma: LzmaOptions,
        check: CheckKind,
    },
    /// Build a dict-reset LZMA2 chunk run without the end marker.
    Lzma2Run { lzma: LzmaOptions },
}

impl Job {
    fn run(&self, data: &[u8]) -> Result<Unit> {
        match self {
            Job::XzBlock { lzma, check } => {
                let mut bytes = Vec::with_capacity(data.len() / 2 + 64);
                let record = compress_block(data, lzma, *check, &mut bytes)?;
                Ok(Unit {
                    bytes,
                    record: Some(record),
                })
            }
            Job::Lzma2Run { lzma } => {
                let mut writer = Lzma2Writer::new(Vec::new(), lzma)?;
                writer.write_all(data).map_err(Error::Io)?;
                let mut bytes = writer.finish()?;
                // Each unit carries its own end marker; strip it and let
                // the output thread terminate the concatenated stream.
                debug_assert_eq!(bytes.last(), Some(&CONTROL_EOS));
                bytes.pop();
                Ok(Unit {
                    bytes,
                    record: None,
                })
            }
        }
    }
}

/// What the output thread writes after the last unit.
#[derive(Clone, Copy)]
enum Trailer {
    /// XZ index and footer.
    Xz { flags: StreamFlags },
    /// The LZMA2 end-of-stream byte.
    Lzma2Eos,
}

struct OutputState<W> {
    inner: W,
    trailer: Trailer,
    header_written: bool,
    records: Vec<IndexRecord>,
}

impl<W: Write> OutputState<W> {
    fn write_header_once(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        if let Trailer::Xz { flags } = self.trailer {
            stream::write_header(&mut self.inner, flags)?;
        }
        self.header_written = true;
        Ok(())
    }

    fn write_unit(&mut self, unit: Unit) -> Result<()> {
        self.write_header_once()?;
        self.inner.write_all(&unit.bytes)?;
        if let Some(record) = unit.record {
            self.records.push(record);
        }
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.write_header_once()?;
        match self.trailer {
            Trailer::Xz { flags } => {
                let mut tail = Vec::with_capacity(32);
                index::encode(&self.records, &mut tail)?;
                self.inner.write_all(&tail)?;
                stream::write_footer(&mut self.inner, flags, index::backward_size(&self.records))?;
            }
            Trailer::Lzma2Eos => {
                self.inner.write_all(&[CONTROL_EOS])?;
            }
        }
        Ok(())
    }
}

fn output_thread<W: Write>(
    mut state: OutputState<W>,
    ctl_rx: Receiver<Ctl>,
    err_tx: Sender<Error>,
    cancel: Arc<AtomicBool>,
) -> Result<W> {
    let mut first_error: Option<Error> = None;

    for ctl in ctl_rx.iter() {
        match ctl {
            Ctl::Unit(result_rx) => {
                let result = result_rx
                    .recv()
                    .map_err(|_| Error::format("worker dropped its result"))
                    .and_then(|r| r);
                if first_error.is_some() {
                    continue;
                }
                let outcome = result.and_then(|unit| state.write_unit(unit));
                if let Err(err) = outcome {
                    cancel.store(true, Ordering::SeqCst);
                    let _ = err_tx.try_send(err.replay());
                    first_error = Some(err);
                }
            }
            Ctl::Flush(ack) => {
                if first_error.is_none() {
                    if let Err(err) = state.inner.flush() {
                        let err = Error::Io(err);
                        cancel.store(true, Ordering::SeqCst);
                        let _ = err_tx.try_send(err.replay());
                        first_error = Some(err);
                    }
                }
                let _ = ack.send(());
            }
            Ctl::Finish => {
                return match first_error {
                    Some(err) => Err(err),
                    None => state.write_trailer().map(|()| state.inner),
                };
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Err(Error::format("output control channel closed early")),
    }
}

/// The ordered producer/worker/output pool shared by both parallel
/// writers.
struct Pool<W: Write + Send + 'static> {
    task_tx: Option<Sender<Task>>,
    task_rx: Receiver<Task>,
    ctl_tx: Option<Sender<Ctl>>,
    out_handle: Option<JoinHandle<Result<W>>>,
    workers: Vec<JoinHandle<()>>,
    max_workers: usize,
    job: Arc<Job>,
    cancel: Arc<AtomicBool>,
    err_rx: Receiver<Error>,
    buffer: Vec<u8>,
    work_size: usize,
    error: Option<Error>,
    finished: bool,
}

impl<W: Write + Send + 'static> Pool<W> {
    fn new(inner: W, job: Job, trailer: Trailer, workers: usize, work_size: usize) -> Self {
        let workers = workers.max(1);
        let (task_tx, task_rx) = bounded::<Task>(workers);
        let (ctl_tx, ctl_rx) = bounded::<Ctl>(workers);
        let (err_tx, err_rx) = bounded::<Error>(1);
        let cancel = Arc::new(AtomicBool::new(false));

        let state = OutputState {
            inner,
            trailer,
            header_written: false,
            records: Vec::new(),
        };
        let out_cancel = Arc::clone(&cancel);
        let out_handle = std::thread::spawn(move || {
            output_thread(state, ctl_rx, err_tx, out_cancel)
        });

        Self {
            task_tx: Some(task_tx),
            task_rx,
            ctl_tx: Some(ctl_tx),
            out_handle: Some(out_handle),
            workers: Vec::new(),
            max_workers: workers,
            job: Arc::new(job),
            cancel,
            err_rx,
            buffer: Vec::with_capacity(work_size),
            work_size,
            error: None,
            finished: false,
        }
    }

    fn guard(&mut self) -> Result<()> {
        if let Some(err) = &self.error {
            return Err(err.replay());
        }
        if self.finished {
            return Err(Error::Closed);
        }
        if let Ok(err) = self.err_rx.try_recv() {
            self.error = Some(err.replay());
            return Err(err);
        }
        Ok(())
    }

    fn spawn_worker(&mut self) {
        let task_rx = self.task_rx.clone();
        let job = Arc::clone(&self.job);
        let cancel = Arc::clone(&self.cancel);
        let id = self.workers.len();
        trace!("spawning worker {id}");
        self.workers.push(std::thread::spawn(move || {
            for task in task_rx.iter() {
                if cancel.load(Ordering::SeqCst) {
                    let _ = task.result_tx.send(Err(Error::Closed));
                    continue;
                }
                let result = job.run(&task.data);
                let _ = task.result_tx.send(result);
            }
        }));
    }

    fn submit(&mut self, data: Vec<u8>) -> Result<()> {
        if self.workers.len() < self.max_workers {
            self.spawn_worker();
        }
        let (result_tx, result_rx) = bounded::<Result<Unit>>(1);
        let ctl_tx = self
            .ctl_tx
            .as_ref()
            .ok_or(Error::Closed)?;
        ctl_tx
            .send(Ctl::Unit(result_rx))
            .map_err(|_| Error::format("output thread gone"))?;
        self.task_tx
            .as_ref()
            .ok_or(Error::Closed)?
            .send(Task { data, result_tx })
            .map_err(|_| Error::format("task queue gone"))?;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.guard()?;
        self.buffer.extend_from_slice(buf);
        while self.buffer.len() >= self.work_size {
            let rest = self.buffer.split_off(self.work_size);
            let unit = std::mem::replace(&mut self.buffer, rest);
            self.submit(unit)?;
        }
        Ok(buf.len())
    }

    /// Submits any partial unit and waits until everything enqueued so far
    /// has been written downstream.
    fn flush(&mut self) -> Result<()> {
        self.guard()?;
        if !self.buffer.is_empty() {
            let unit = std::mem::take(&mut self.buffer);
            self.submit(unit)?;
        }
        let (ack_tx, ack_rx) = bounded::<()>(1);
        self.ctl_tx
            .as_ref()
            .ok_or(Error::Closed)?
            .send(Ctl::Flush(ack_tx))
            .map_err(|_| Error::format("output thread gone"))?;
        ack_rx
            .recv()
            .map_err(|_| Error::format("output thread gone"))?;
        // A failure observed while flushing surfaces here.
        self.guard()
    }

    fn finish(&mut self) -> Result<W> {
        self.guard()?;
        if !self.buffer.is_empty() {
            let unit = std::mem::take(&mut self.buffer);
            self.submit(unit)?;
        }
        self.ctl_tx
            .as_ref()
            .ok_or(Error::Closed)?
            .send(Ctl::Finish)
            .map_err(|_| Error::format("output thread gone"))?;
        self.finished = true;

        // Closing the channels lets the workers and output thread drain.
        self.task_tx.take();
        self.ctl_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        let result = self
            .out_handle
            .take()
            .expect("finish called once")
            .join()
            .map_err(|_| Error::format("output thread panicked"))?;
        debug!("pool finished");
        result
    }
}

impl<W: Write + Send + 'static> Drop for Pool<W> {
    fn drop(&mut self) {
        // Abandoned without finish: cancel and detach.
        self.cancel.store(true, Ordering::SeqCst);
        self.task_tx.take();
        self.ctl_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(handle) = self.out_handle.take() {
            let _ = handle.join();
        }
    }
}

/// A multi-threaded XZ compressor using block parallelism.
///
/// Input is split into `work_size` units; each worker compresses a full
/// independent block (own filter pipeline, own check), and blocks appear
/// in the output in submission order.
pub struct XzWriterMt<W: Write + Send + 'static> {
    pool: Pool<W>,
    dict_size: u32,
}

impl<W: Write + Send + 'static> XzWriterMt<W> {
    /// Creates a pooled writer; defaults are applied to and the result
    /// verified against a private copy of `options`.
    pub fn new(inner: W, options: &WriterOptions) -> Result<Self> {
        let mut options = options.clone();
        options.apply_defaults();
        options.verify()?;

        let job = Job::XzBlock {
            lzma: options.lzma.clone(),
            check: options.checksum,
        };
        let trailer = Trailer::Xz {
            flags: StreamFlags {
                check: options.checksum,
            },
        };
        Ok(Self {
            pool: Pool::new(
                inner,
                job,
                trailer,
                options.workers as usize,
                options.work_size,
            ),
            dict_size: options.lzma.dict_size,
        })
    }

    /// The dictionary size blocks are encoded against.
    pub fn dict_size(&self) -> u32 {
        self.dict_size
    }

    /// Flushes remaining data, writes the index and footer and returns the
    /// inner writer.
    pub fn finish(mut self) -> Result<W> {
        self.pool.finish()
    }
}

impl<W: Write + Send + 'static> Write for XzWriterMt<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pool.write(buf).map_err(Error::into_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.pool.flush().map_err(Error::into_io)
    }
}

/// A multi-threaded LZMA2 compressor using chunk parallelism.
///
/// A single chunk stream is produced; every work unit starts with a full
/// dictionary reset, which costs some ratio but makes units independent.
pub struct Lzma2WriterMt<W: Write + Send + 'static> {
    pool: Pool<W>,
    dict_size: u32,
}

impl<W: Write + Send + 'static> Lzma2WriterMt<W> {
    /// Creates a pooled writer over `workers` threads with `work_size`
    /// bytes per unit.
    pub fn new(inner: W, options: &LzmaOptions, workers: u32, work_size: usize) -> Result<Self> {
        let mut options = options.clone();
        options.apply_defaults();
        options.verify(true)?;
        if work_size == 0 {
            return Err(Error::ConfigInvalid("work size must be non-zero".into()));
        }

        let job = Job::Lzma2Run {
            lzma: options.clone(),
        };
        Ok(Self {
            pool: Pool::new(inner, job, Trailer::Lzma2Eos, workers as usize, work_size),
            dict_size: options.dict_size,
        })
    }

    /// The dictionary size chunks are encoded against.
    pub fn dict_size(&self) -> u32 {
        self.dict_size
    }

    /// Flushes remaining data, writes the end-of-stream byte and returns
    /// the inner writer.
    pub fn finish(mut self) -> Result<W> {
        self.pool.finish()
    }
}

impl<W: Write + Send + 'static> Write for Lzma2WriterMt<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pool.write(buf).map_err(Error::into_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.pool.flush().map_err(Error::into_io)
    }
}
