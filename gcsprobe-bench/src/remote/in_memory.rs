//! In-memory remote for tests.
//!
//! The remote is [`Clone`] so tests can hold a handle for direct inspection while the benchmark
//! borrows another copy.

use std::collections::HashMap;
use std::io;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, TryStreamExt};

use super::{ObjectWriter, RangeReader, Remote, RemoteError, RemoteResult};

/// Size of the chunks returned by range readers.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Default)]
struct State {
    objects: HashMap<String, Bytes>,
    reads: Vec<(String, Range<u64>)>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct InMemoryRemote {
    state: Arc<Mutex<State>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object directly, bypassing the `Remote` trait.
    pub fn insert(&self, object: &str, contents: impl Into<Bytes>) {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(object.into(), contents.into());
    }

    /// Returns the stored contents of an object, if present.
    pub fn get(&self, object: &str) -> Option<Bytes> {
        self.state.lock().unwrap().objects.get(object).cloned()
    }

    /// Returns all ranges requested from `range_reader`, in order.
    pub fn reads(&self) -> Vec<(String, Range<u64>)> {
        self.state.lock().unwrap().reads.clone()
    }
}

#[async_trait::async_trait]
impl Remote for InMemoryRemote {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn writer(&self, object: &str) -> ObjectWriter {
        let state = Arc::clone(&self.state);
        let object = object.to_owned();

        ObjectWriter::spawn(move |stream| async move {
            let contents: BytesMut = stream.try_collect().await?;
            let mut state = state.lock().unwrap();
            state.objects.insert(object, contents.freeze());
            Ok(())
        })
    }

    async fn range_reader(&self, object: &str, range: Range<u64>) -> RemoteResult<RangeReader> {
        let mut state = self.state.lock().unwrap();
        state.reads.push((object.into(), range.clone()));

        let contents = state
            .objects
            .get(object)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(object.into()))?;

        let end = (range.end as usize).min(contents.len());
        let start = (range.start as usize).min(end);
        let chunks: Vec<_> = (start..end)
            .step_by(CHUNK_SIZE)
            .map(|offset| {
                let chunk = contents.slice(offset..(offset + CHUNK_SIZE).min(end));
                Ok::<_, io::Error>(chunk)
            })
            .collect();

        Ok(RangeReader::new(futures_util::stream::iter(chunks).boxed()))
    }

    async fn list_objects(&self) -> RemoteResult<u64> {
        Ok(self.state.lock().unwrap().objects.len() as u64)
    }
}
