use image::RgbaImage;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::watermark::model::{ContentId, WatermarkImage};

pub const DEFAULT_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
pub enum BitmapEntry {
    Pending,
    Ready(Arc<RgbaImage>),
    Failed,
}

#[derive(Debug, Clone)]
pub enum BitmapRequest {
    Ready(Arc<RgbaImage>),
    Pending,
    Failed,
}

/// Decoded watermark bitmaps keyed by content hash.
///
/// Requests queue a decode and return immediately; `pump` performs queued
/// decodes. A failed decode stays failed until `forget_failures` is called.
/// The oldest entry is evicted once `capacity` is exceeded.
#[derive(Debug)]
pub struct BitmapCache {
    entries: HashMap<ContentId, BitmapEntry>,
    order: VecDeque<ContentId>,
    queue: VecDeque<(ContentId, Arc<[u8]>)>,
    capacity: usize,
}

impl Default for BitmapCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl BitmapCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Ready bitmap for `image`, or `Pending` after queueing a decode.
    pub fn request(&mut self, image: &WatermarkImage) -> BitmapRequest {
        let id = image.id();
        match self.entries.get(&id) {
            Some(BitmapEntry::Ready(bitmap)) => return BitmapRequest::Ready(Arc::clone(bitmap)),
            Some(BitmapEntry::Pending) => return BitmapRequest::Pending,
            Some(BitmapEntry::Failed) => return BitmapRequest::Failed,
            None => {}
        }
        tracing::debug!(id = ?id, "queueing watermark bitmap decode");
        self.insert(id, BitmapEntry::Pending);
        self.queue.push_back((id, image.shared_bytes()));
        BitmapRequest::Pending
    }

    /// Decode `image` immediately if it is not already ready.
    pub fn resolve_now(&mut self, image: &WatermarkImage) -> Option<Arc<RgbaImage>> {
        let id = image.id();
        if let Some(BitmapEntry::Ready(bitmap)) = self.entries.get(&id) {
            return Some(Arc::clone(bitmap));
        }
        self.queue.retain(|(queued, _)| *queued != id);
        let entry = decode(id, image.bytes());
        let bitmap = match &entry {
            BitmapEntry::Ready(bitmap) => Some(Arc::clone(bitmap)),
            _ => None,
        };
        self.insert(id, entry);
        bitmap
    }

    /// Drop failed entries so the next request decodes them again.
    /// Returns how many were dropped.
    pub fn forget_failures(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !matches!(entry, BitmapEntry::Failed));
        let entries = &self.entries;
        self.order.retain(|id| entries.contains_key(id));
        before - self.entries.len()
    }

    /// Run all queued decodes. Returns how many entries settled, whether
    /// ready or failed.
    pub fn pump(&mut self) -> usize {
        let mut settled = 0;
        while let Some((id, bytes)) = self.queue.pop_front() {
            if !matches!(self.entries.get(&id), Some(BitmapEntry::Pending)) {
                continue;
            }
            let entry = decode(id, &bytes);
            self.entries.insert(id, entry);
            settled += 1;
        }
        settled
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn state(&self, id: &ContentId) -> Option<&BitmapEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, id: ContentId, entry: BitmapEntry) {
        if self.entries.insert(id, entry).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                self.queue.retain(|(queued, _)| *queued != oldest);
                tracing::debug!(id = ?oldest, "evicted watermark bitmap");
            }
        }
    }
}

fn decode(id: ContentId, bytes: &[u8]) -> BitmapEntry {
    match image::load_from_memory(bytes) {
        Ok(decoded) => BitmapEntry::Ready(Arc::new(decoded.to_rgba8())),
        Err(err) => {
            tracing::warn!(id = ?id, "failed to decode watermark image: {err}");
            BitmapEntry::Failed
        }
    }
}
