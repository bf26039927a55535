//! Streams: server-evaluated calls whose results are pushed continuously.
//!
//! # Architecture
//!
//! - **[`StreamManager`]**: owns the id -> entry table and the reader task
//! - **Reader task**: sole consumer of the stream connection, writes each
//!   update into the matching entry
//! - **[`Stream`]**: caller-side handle onto one entry
//!
//! Creating the same call twice yields the same stream id from the server,
//! and therefore the same entry. Creation and removal are serialized so the
//! check-invoke-insert sequence for one id runs exactly once. The table lock
//! is only ever held for map operations, never across a call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use krpc_common::transport::StreamConnection;
use krpc_common::{pb, KrpcError, Result, RpcErrorDetails};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::encoding;
use crate::procedure::ProcedureSignature;
use crate::types::TypeDescriptor;
use crate::value::Value;

/// Stream management calls on the `KRPC` service.
///
/// Implemented by [`CallExecutor`](crate::call::CallExecutor); the manager
/// only depends on this trait.
pub trait StreamControl: Send + Sync {
    /// `AddStream(call, start)`, returning the stream id.
    fn add_stream(
        &self,
        call: &pb::ProcedureCall,
        start: bool,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn start_stream(&self, id: u64) -> impl Future<Output = Result<()>> + Send;

    fn set_stream_rate(&self, id: u64, rate: f32) -> impl Future<Output = Result<()>> + Send;

    fn remove_stream(&self, id: u64) -> impl Future<Output = Result<()>> + Send;
}

// ============================================================================
// Entries
// ============================================================================

#[derive(Debug, Clone)]
enum Current {
    Value(Value),
    Error(RpcErrorDetails),
    /// An update that could not be decoded
    Invalid(String),
    /// The stream connection ended while the stream was live
    Disconnected(String),
    Removed,
}

#[derive(Debug)]
struct StreamEntry {
    id: u64,
    return_type: TypeDescriptor,
    call: pb::ProcedureCall,
    active: AtomicBool,
    current: Mutex<Current>,
}

impl StreamEntry {
    fn current(&self) -> MutexGuard<'_, Current> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a result from the reader. Ignored once the entry is removed.
    fn apply(&self, result: Option<pb::ProcedureResult>) {
        let next = match result {
            Some(pb::ProcedureResult {
                error: Some(error), ..
            }) => Current::Error(RpcErrorDetails::from(&error)),
            Some(result) => match encoding::decode(&result.value, &self.return_type) {
                Ok(value) => Current::Value(value),
                Err(e) => {
                    tracing::warn!("Failed to decode update for stream {}: {}", self.id, e);
                    Current::Invalid(e.to_string())
                }
            },
            None => Current::Invalid("update carried no result".to_string()),
        };

        let mut current = self.current();
        if self.active.load(Ordering::SeqCst) {
            *current = next;
        }
    }

    fn disconnect(&self, reason: &str) {
        let mut current = self.current();
        if self.active.load(Ordering::SeqCst) {
            *current = Current::Disconnected(reason.to_string());
        }
    }

    fn deactivate(&self) {
        let mut current = self.current();
        self.active.store(false, Ordering::SeqCst);
        *current = Current::Removed;
    }
}

/// Handle to a live stream.
///
/// Clones refer to the same stream; two handles are equal when they share
/// an entry.
#[derive(Debug, Clone)]
pub struct Stream {
    entry: Arc<StreamEntry>,
}

impl Stream {
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    pub fn return_type(&self) -> &TypeDescriptor {
        &self.entry.return_type
    }

    /// The call the server re-evaluates for this stream.
    pub fn call(&self) -> &pb::ProcedureCall {
        &self.entry.call
    }

    pub fn is_active(&self) -> bool {
        self.entry.active.load(Ordering::SeqCst)
    }

    /// Latest value of the stream.
    ///
    /// # Errors
    ///
    /// - `Rpc` if the server reported an error for the latest evaluation
    /// - `InvalidResponse` if the latest update could not be decoded
    /// - `Connection` if the stream connection was lost and no more updates
    ///   will arrive
    /// - `StreamRemoved` once the stream has been removed or the client closed
    pub fn get(&self) -> Result<Value> {
        match &*self.entry.current() {
            Current::Value(value) => Ok(value.clone()),
            Current::Error(details) => Err(KrpcError::Rpc(details.clone())),
            Current::Invalid(message) => Err(KrpcError::InvalidResponse(message.clone())),
            Current::Disconnected(reason) => Err(KrpcError::Connection(reason.clone())),
            Current::Removed => Err(KrpcError::StreamRemoved),
        }
    }
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl Eq for Stream {}

// ============================================================================
// Table
// ============================================================================

#[derive(Debug, Default)]
struct StreamTable {
    entries: Mutex<HashMap<u64, Arc<StreamEntry>>>,
    /// Set while no reader is running; updates are dropped.
    closed: AtomicBool,
}

impl StreamTable {
    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Arc<StreamEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, id: u64) -> Option<Arc<StreamEntry>> {
        self.entries().get(&id).cloned()
    }

    fn dispatch(&self, update: pb::StreamUpdate) {
        for result in update.results {
            let entry = {
                let entries = self.entries();
                if self.closed.load(Ordering::SeqCst) {
                    return;
                }
                entries.get(&result.id).cloned()
            };
            match entry {
                Some(entry) => entry.apply(result.result),
                None => tracing::debug!("Ignoring update for unknown stream {}", result.id),
            }
        }
    }

    /// Closes the table after the reader ended on its own.
    fn disconnect(&self, reason: &str) {
        let entries: Vec<_> = {
            let entries = self.entries();
            self.closed.store(true, Ordering::SeqCst);
            entries.values().cloned().collect()
        };
        for entry in entries {
            entry.disconnect(reason);
        }
    }
}

struct Reader {
    stop: watch::Sender<bool>,
    task: JoinHandle<StreamConnection>,
}

// ============================================================================
// Manager
// ============================================================================

/// Tracks the client's streams and runs the stream reader.
pub struct StreamManager<C> {
    control: Arc<C>,
    table: Arc<StreamTable>,
    lifecycle: tokio::sync::Mutex<()>,
    reader: Mutex<Option<Reader>>,
}

impl<C: StreamControl> StreamManager<C> {
    pub fn new(control: Arc<C>) -> Self {
        let table = StreamTable {
            closed: AtomicBool::new(true),
            ..Default::default()
        };
        Self {
            control,
            table: Arc::new(table),
            lifecycle: tokio::sync::Mutex::new(()),
            reader: Mutex::new(None),
        }
    }

    /// Opens a stream for `call`, or returns the existing one.
    ///
    /// `invoke` is awaited once, only when the stream is new, to obtain the
    /// initial value; an existing stream is returned without it.
    ///
    /// # Errors
    ///
    /// `UnsupportedStream` for property setters and procedures without a
    /// return value; otherwise whatever `AddStream` or `invoke` fail with.
    pub async fn create<F, Fut>(
        &self,
        signature: &ProcedureSignature,
        call: pb::ProcedureCall,
        invoke: F,
    ) -> Result<Stream>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if signature.member_kind.is_setter() {
            return Err(KrpcError::UnsupportedStream(format!(
                "property setter {}",
                signature.full_name()
            )));
        }
        let Some(return_type) = signature.return_type.clone() else {
            return Err(KrpcError::UnsupportedStream(format!(
                "{}, it returns no value",
                signature.full_name()
            )));
        };

        let _lifecycle = self.lifecycle.lock().await;
        let id = self.control.add_stream(&call, true).await?;

        if let Some(entry) = self.table.get(id) {
            tracing::debug!("Reusing stream {} for {}", id, signature.full_name());
            return Ok(Stream { entry });
        }

        let initial = invoke().await?;
        let entry = Arc::new(StreamEntry {
            id,
            return_type,
            call,
            active: AtomicBool::new(true),
            current: Mutex::new(Current::Value(initial)),
        });
        self.table.entries().insert(id, Arc::clone(&entry));
        tracing::info!("Created stream {} for {}", id, signature.full_name());

        Ok(Stream { entry })
    }

    /// Removes a stream.
    ///
    /// Returns `false` if it was already inactive. Afterwards [`Stream::get`]
    /// fails with `StreamRemoved`.
    pub async fn remove(&self, stream: &Stream) -> Result<bool> {
        if !stream.is_active() {
            return Ok(false);
        }

        let _lifecycle = self.lifecycle.lock().await;
        let id = stream.id();
        if self.table.get(id).is_none() {
            stream.entry.deactivate();
            return Ok(false);
        }

        self.control.remove_stream(id).await?;
        self.table.entries().remove(&id);
        stream.entry.deactivate();
        tracing::info!("Removed stream {}", id);
        Ok(true)
    }

    /// Removes every stream.
    ///
    /// Server errors are logged and do not stop the remaining removals;
    /// every entry ends up inactive regardless.
    pub async fn remove_all(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let entries: Vec<_> = self.table.entries().drain().map(|(_, e)| e).collect();

        for entry in entries {
            if let Err(e) = self.control.remove_stream(entry.id).await {
                tracing::warn!("Failed to remove stream {}: {}", entry.id, e);
            }
            entry.deactivate();
        }
    }

    /// Starts a stream that was added without starting it.
    pub async fn start(&self, stream: &Stream) -> Result<()> {
        Self::ensure_active(stream)?;
        self.control.start_stream(stream.id()).await
    }

    /// Sets the update rate of a stream, in hertz.
    pub async fn set_rate(&self, stream: &Stream, rate: f32) -> Result<()> {
        Self::ensure_active(stream)?;
        self.control.set_stream_rate(stream.id(), rate).await
    }

    /// Looks up an active stream by id.
    pub fn get(&self, id: u64) -> Option<Stream> {
        self.table.get(id).map(|entry| Stream { entry })
    }

    pub fn len(&self) -> usize {
        self.table.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.entries().is_empty()
    }

    fn ensure_active(stream: &Stream) -> Result<()> {
        if stream.is_active() {
            Ok(())
        } else {
            Err(KrpcError::StreamRemoved)
        }
    }

    /// Spawns the reader task on `connection`, replacing any previous reader.
    pub async fn start_reader(&self, connection: StreamConnection) {
        self.stop_reader().await;

        let (stop, stopped) = watch::channel(false);
        self.table.closed.store(false, Ordering::SeqCst);
        let task = tokio::spawn(read_updates(connection, Arc::clone(&self.table), stopped));

        *self.reader_slot() = Some(Reader { stop, task });
        tracing::debug!("Stream reader started");
    }

    /// Stops the reader and closes the stream connection.
    ///
    /// The reader is only interrupted between updates. Returns `false` if no
    /// reader was running.
    pub async fn stop_reader(&self) -> bool {
        let reader = self.reader_slot().take();
        self.table.closed.store(true, Ordering::SeqCst);

        let Some(reader) = reader else {
            return false;
        };
        let _ = reader.stop.send(true);
        match reader.task.await {
            Ok(connection) => connection.shutdown().await,
            Err(e) => tracing::warn!("Stream reader task failed: {}", e),
        }
        tracing::debug!("Stream reader stopped");
        true
    }

    fn reader_slot(&self) -> MutexGuard<'_, Option<Reader>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn read_updates(
    mut connection: StreamConnection,
    table: Arc<StreamTable>,
    mut stop: watch::Receiver<bool>,
) -> StreamConnection {
    let reason = loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break None,
            ready = connection.wait_for_frame() => match ready {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!("Stream connection closed by server");
                    break Some("Stream connection closed by server".to_string());
                }
                Err(e) => {
                    tracing::warn!("Stream connection failed: {}", e);
                    break Some(e.to_string());
                }
            },
        }

        match connection.next_update().await {
            Ok(update) => table.dispatch(update),
            Err(e) => {
                tracing::warn!("Failed to read stream update: {}", e);
                break Some(e.to_string());
            }
        }
    };

    // Stopped on request unless a reason was recorded
    if let Some(reason) = reason {
        table.disconnect(&reason);
    }
    connection
}
