//! Ring slot

use std::collections::HashSet;

use crate::media::{MediaData, MediaType};

use super::ReceiverId;

/// One slot of the dispatch ring
///
/// The frame is immutable once written. Only the ownership sets change:
/// `data_ref` shrinks as receivers consume (or give up) the slot, `read_ref`
/// grows as they read it.
#[derive(Debug)]
pub struct DataSpec {
    /// Logical index, never reused
    pub(crate) index: u64,
    /// The frame
    pub(crate) media: MediaData,
    /// Receivers that still owe this slot
    pub(crate) data_ref: HashSet<ReceiverId>,
    /// Receivers that have read this slot
    pub(crate) read_ref: HashSet<ReceiverId>,
}

impl DataSpec {
    pub(crate) fn new(index: u64, media: MediaData, data_ref: HashSet<ReceiverId>) -> Self {
        Self {
            index,
            media,
            data_ref,
            read_ref: HashSet::new(),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn media(&self) -> &MediaData {
        &self.media
    }

    pub fn media_type(&self) -> MediaType {
        self.media.media_type
    }

    pub fn is_video_key(&self) -> bool {
        self.media.is_video_key()
    }

    /// Whether any attached receiver still owes this slot
    pub fn is_owed(&self) -> bool {
        !self.data_ref.is_empty()
    }

    pub fn is_owed_by(&self, id: ReceiverId) -> bool {
        self.data_ref.contains(&id)
    }

    pub fn is_read_by(&self, id: ReceiverId) -> bool {
        self.read_ref.contains(&id)
    }

    /// Record delivery to `id`
    ///
    /// Returns false if `id` had already read this slot.
    pub(crate) fn mark_read(&mut self, id: ReceiverId) -> bool {
        self.data_ref.remove(&id);
        self.read_ref.insert(id)
    }

    /// Release `id`'s claim without reading
    pub(crate) fn release(&mut self, id: ReceiverId) {
        self.data_ref.remove(&id);
    }

    /// Forget `id` entirely (detach)
    pub(crate) fn forget(&mut self, id: ReceiverId) {
        self.data_ref.remove(&id);
        self.read_ref.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_mark_read_once() {
        let owners: HashSet<ReceiverId> = [1, 2].into_iter().collect();
        let mut slot = DataSpec::new(7, MediaData::audio(0, Bytes::from_static(b"a")), owners);

        assert!(slot.is_owed_by(1));
        assert!(slot.mark_read(1));
        assert!(!slot.is_owed_by(1));
        assert!(slot.is_read_by(1));
        assert!(!slot.mark_read(1));

        assert!(slot.is_owed());
        slot.release(2);
        assert!(!slot.is_owed());
        assert!(!slot.is_read_by(2));
    }

    #[test]
    fn test_forget_clears_both_sets() {
        let owners: HashSet<ReceiverId> = [3].into_iter().collect();
        let mut slot = DataSpec::new(0, MediaData::video(0, Bytes::from_static(b"v"), true), owners);
        slot.mark_read(3);
        slot.forget(3);

        assert!(!slot.is_owed_by(3));
        assert!(!slot.is_read_by(3));
        assert!(slot.is_video_key());
        assert_eq!(slot.index(), 0);
        assert_eq!(slot.media().data.as_ref(), b"v");
    }
}
