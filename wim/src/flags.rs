//! The `open_flags` and `write_flags` sets, including the documented
//! mutually-exclusive pairs and `unsafe-compact`'s extra incompatibilities.

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// Flags accepted by [`crate::Wim::open`].
    #[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
    pub struct OpenFlags: u32 {
        /// Verify the integrity table (if present) before returning a
        /// handle; fail with [`Error::Integrity`] on mismatch.
        const CHECK_INTEGRITY = 1 << 0;
        /// Allow opening one part of a spanned set on its own.
        const SPLIT_OK = 1 << 1;
        /// Open for read-write access (required before any write call).
        const WRITE_ACCESS = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Flags accepted by [`crate::Wim::write`]/`write_to_fd`/`overwrite`.
    #[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
    pub struct WriteFlags: u32 {
        /// Compute and write a fresh integrity table.
        const CHECK_INTEGRITY = 1 << 0;
        /// Drop the integrity table rather than recomputing it.
        const NO_CHECK_INTEGRITY = 1 << 1;
        /// Produce a pipable (sequential-only) WIM.
        const PIPABLE = 1 << 2;
        /// Produce a normal (seekable) WIM, even if the source was pipable.
        const NOT_PIPABLE = 1 << 3;
        /// Recompress every resource instead of raw-copying compatible ones.
        const RECOMPRESS = 1 << 4;
        /// fsync the output before considering the write durable.
        const FSYNC = 1 << 5;
        /// Force the rebuild-via-temp-file strategy.
        const REBUILD = 1 << 6;
        /// Soft-delete: drop deleted images' blob references without
        /// physically reclaiming their space this write.
        const SOFT_DELETE = 1 << 7;
        /// Ignore the container's own READONLY flag.
        const IGNORE_READONLY = 1 << 8;
        /// Assume unmodified images' existing blob refcounts are
        /// authoritative.
        const STREAMS_OK = 1 << 9;
        /// Keep the container's existing GUID instead of minting a new one.
        const RETAIN_GUID = 1 << 10;
        /// Pack written blobs into solid resources.
        const SOLID = 1 << 11;
        /// The caller will close the file descriptor itself; the library
        /// should not close it after `write_to_fd` returns.
        const SEND_DONE_WITH_FILE = 1 << 12;
        /// Preserve input blob order in solid resources rather than
        /// sorting for better locality.
        const NO_SOLID_SORT = 1 << 13;
        /// Use the in-place compaction strategy.
        const UNSAFE_COMPACT = 1 << 14;
        /// Drop blobs backed by a different container rather than writing
        /// them.
        const SKIP_EXTERNAL_WIMS = 1 << 15;
    }
}

impl OpenFlags {
    /// Validates flag combinations; currently every bit of `OpenFlags` is
    /// independent, so this always succeeds, but it exists so callers have
    /// one place to route validation through as the set grows.
    pub fn validate(self) -> Result<()> {
        Ok(())
    }
}

impl WriteFlags {
    /// Validates the mutually-exclusive pairs and `unsafe-compact`'s extra
    /// constraints.
    pub fn validate(self) -> Result<()> {
        if self.contains(Self::CHECK_INTEGRITY) && self.contains(Self::NO_CHECK_INTEGRITY) {
            return Err(Error::InvalidParam(
                "check-integrity and no-check-integrity are mutually exclusive".into(),
            )
            .into());
        }
        if self.contains(Self::PIPABLE) && self.contains(Self::NOT_PIPABLE) {
            return Err(Error::InvalidParam("pipable and not-pipable are mutually exclusive".into()).into());
        }
        if self.contains(Self::UNSAFE_COMPACT) && self.contains(Self::RECOMPRESS) {
            return Err(Error::InvalidParam("unsafe-compact is incompatible with recompress".into()).into());
        }
        Ok(())
    }

    /// `unsafe-compact` implies `soft-delete` and `no-solid-sort`, and
    /// ignores `rebuild` outright. Call this after `validate()` to get the
    /// flags actually in effect.
    pub fn normalize(mut self) -> Self {
        if self.contains(Self::UNSAFE_COMPACT) {
            self |= Self::SOFT_DELETE | Self::NO_SOLID_SORT;
            self &= !Self::REBUILD;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_contradictory_integrity_flags() {
        let flags = WriteFlags::CHECK_INTEGRITY | WriteFlags::NO_CHECK_INTEGRITY;
        assert!(flags.validate().is_err());
    }

    #[test]
    fn rejects_compact_with_recompress() {
        let flags = WriteFlags::UNSAFE_COMPACT | WriteFlags::RECOMPRESS;
        assert!(flags.validate().is_err());
    }

    #[test]
    fn compact_implies_soft_delete_and_drops_rebuild() {
        let flags = (WriteFlags::UNSAFE_COMPACT | WriteFlags::REBUILD).normalize();
        assert!(flags.contains(WriteFlags::SOFT_DELETE));
        assert!(flags.contains(WriteFlags::NO_SOLID_SORT));
        assert!(!flags.contains(WriteFlags::REBUILD));
    }
}
