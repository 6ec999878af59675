//! チャンク算術
//!
//! バイトオフセット/長さとチャンクインデックスの相互変換を行う純粋関数群。
//! チャンクサイズは常に2の冪であることを前提とする。

/// 2の冪かどうか
#[inline]
pub const fn is_pow2(n: u64) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

/// 2の冪に対する log2
#[inline]
pub const fn log2(n: u64) -> u32 {
    debug_assert!(is_pow2(n));
    n.trailing_zeros()
}

/// `off` 以下で最大の `chunk_size` の倍数
#[inline]
pub const fn align_left(off: u64, chunk_size: u64) -> u64 {
    debug_assert!(is_pow2(chunk_size));
    off & !(chunk_size - 1)
}

/// `off` より厳密に大きい最小の `chunk_size` の倍数
#[inline]
pub const fn align_right(off: u64, chunk_size: u64) -> u64 {
    align_left(off, chunk_size) + chunk_size
}

/// チャンク先頭から `off` までの距離
#[inline]
pub const fn overrun(off: u64, chunk_size: u64) -> u64 {
    off - align_left(off, chunk_size)
}

/// `off` から次のチャンク境界までの距離
#[inline]
pub const fn underrun(off: u64, chunk_size: u64) -> u64 {
    align_right(off, chunk_size) - off
}

#[inline]
pub const fn is_aligned(off: u64, chunk_size: u64) -> bool {
    overrun(off, chunk_size) == 0
}

/// `off` を含むチャンクのインデックス
#[inline]
pub const fn chunk_index(off: u64, chunk_size: u64) -> u64 {
    align_left(off, chunk_size) >> log2(chunk_size)
}

/// 半開区間 `[off, off + count)` が触れるチャンク数 (`count == 0` なら 0)
///
/// `off + count` はオーバーフローしないことが前提条件。
#[inline]
pub const fn chunk_count(off: u64, count: u64, chunk_size: u64) -> u64 {
    if count == 0 {
        return 0;
    }
    debug_assert!(off.checked_add(count).is_some());

    let end = off + count;
    let first = chunk_index(off, chunk_size);
    let last_boundary = align_left(end, chunk_size) >> log2(chunk_size);
    let tail = if is_aligned(end, chunk_size) { 0 } else { 1 };
    last_boundary - first + tail
}

/// チャンキングエラー
#[derive(Debug, thiserror::Error)]
pub enum ChunkingError {
    #[error("Chunk size must be a power of two, got {0}")]
    NotPowerOfTwo(u64),

    #[error("Byte range overflows: offset {offset} + count {count}")]
    RangeOverflow { offset: u64, count: u64 },
}

pub type ChunkingResult<T> = Result<T, ChunkingError>;

/// 1チャンク分の転送区間
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSegment {
    /// チャンクインデックス
    pub index: u64,

    /// チャンク内オフセット
    pub offset_in_chunk: u64,

    /// 転送サイズ
    pub len: u64,

    /// 呼び出し側バッファ内のオフセット
    pub buf_offset: u64,
}

/// 操作全体が触れるチャンク範囲 (両端を含む)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub first: u64,
    pub last: u64,
}

impl ChunkSpan {
    /// 範囲内のチャンク数
    pub fn count(&self) -> u64 {
        self.last - self.first + 1
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<u64> {
        self.first..=self.last
    }

    pub fn contains(&self, index: u64) -> bool {
        (self.first..=self.last).contains(&index)
    }
}

/// チャンクマネージャー
///
/// チャンクサイズを保持し、チャンク算術をメソッドとして提供する
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkManager {
    /// チャンクサイズ (バイト)
    chunk_size: u64,
}

impl ChunkManager {
    /// 指定されたチャンクサイズでチャンクマネージャーを作成
    pub fn with_chunk_size(chunk_size: u64) -> ChunkingResult<Self> {
        if !is_pow2(chunk_size) {
            return Err(ChunkingError::NotPowerOfTwo(chunk_size));
        }
        Ok(Self { chunk_size })
    }

    /// チャンクサイズを取得
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn index(&self, off: u64) -> u64 {
        chunk_index(off, self.chunk_size)
    }

    pub fn overrun(&self, off: u64) -> u64 {
        overrun(off, self.chunk_size)
    }

    pub fn is_aligned(&self, off: u64) -> bool {
        is_aligned(off, self.chunk_size)
    }

    /// 指定されたチャンクの先頭オフセット
    pub fn chunk_offset(&self, index: u64) -> u64 {
        index << log2(self.chunk_size)
    }

    pub fn count(&self, off: u64, count: u64) -> u64 {
        chunk_count(off, count, self.chunk_size)
    }

    /// `[off, off + count)` のチャンク範囲 (`count == 0` なら `None`)
    pub fn span(&self, off: u64, count: u64) -> ChunkingResult<Option<ChunkSpan>> {
        let end = off
            .checked_add(count)
            .ok_or(ChunkingError::RangeOverflow { offset: off, count })?;
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(ChunkSpan {
            first: self.index(off),
            last: self.index(end - 1),
        }))
    }

    /// 操作 `[off, off + count)` のうちチャンク `index` に入る区間
    ///
    /// `index` は `span(off, count)` の範囲内であること。
    pub fn segment(&self, off: u64, count: u64, index: u64) -> ChunkSegment {
        let chunk_start = self.chunk_offset(index);
        let lo = off.max(chunk_start);
        let hi = (off + count).min(chunk_start + self.chunk_size);
        ChunkSegment {
            index,
            offset_in_chunk: lo - chunk_start,
            len: hi.saturating_sub(lo),
            buf_offset: lo - off,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: u64 = 64;

    #[test]
    fn test_pow2_and_log2() {
        assert!(is_pow2(1));
        assert!(is_pow2(512 * 1024));
        assert!(!is_pow2(0));
        assert!(!is_pow2(40));
        assert_eq!(log2(1), 0);
        assert_eq!(log2(64), 6);
        assert_eq!(log2(512 * 1024), 19);
    }

    #[test]
    fn test_alignment() {
        assert_eq!(align_left(0, C), 0);
        assert_eq!(align_left(63, C), 0);
        assert_eq!(align_left(64, C), 64);
        assert_eq!(align_right(0, C), 64);
        assert_eq!(align_right(64, C), 128);
        assert_eq!(overrun(70, C), 6);
        assert_eq!(underrun(70, C), 58);
        assert_eq!(underrun(64, C), 64);
    }

    #[test]
    fn test_chunk_index() {
        assert_eq!(chunk_index(0, C), 0);
        assert_eq!(chunk_index(63, C), 0);
        assert_eq!(chunk_index(64, C), 1);
        assert_eq!(chunk_index(200, C), 3);
    }

    #[test]
    fn test_chunk_count() {
        // count == 0 はオフセットに関係なく 0
        assert_eq!(chunk_count(0, 0, C), 0);
        assert_eq!(chunk_count(1000, 0, C), 0);

        assert_eq!(chunk_count(0, 1, C), 1);
        assert_eq!(chunk_count(0, 64, C), 1);
        assert_eq!(chunk_count(0, 65, C), 2);
        assert_eq!(chunk_count(63, 2, C), 2);
        assert_eq!(chunk_count(10, 200, C), 4);
        assert_eq!(chunk_count(64, 128, C), 2);
    }

    #[test]
    fn test_manager_rejects_non_pow2() {
        assert!(ChunkManager::with_chunk_size(40).is_err());
        assert!(ChunkManager::with_chunk_size(0).is_err());
        assert!(ChunkManager::with_chunk_size(32).is_ok());
    }

    #[test]
    fn test_span() {
        let manager = ChunkManager::with_chunk_size(32).unwrap();
        assert_eq!(manager.span(5, 0).unwrap(), None);

        let span = manager.span(10, 100).unwrap().unwrap();
        assert_eq!(span, ChunkSpan { first: 0, last: 3 });
        assert_eq!(span.count(), 4);
        assert!(span.contains(3));
        assert!(!span.contains(4));
        assert_eq!(span.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);

        assert!(manager.span(u64::MAX, 2).is_err());
    }

    #[test]
    fn test_segments() {
        let manager = ChunkManager::with_chunk_size(32).unwrap();

        // [10, 110): 最初のチャンクは途中から、最後のチャンクは途中まで
        let first = manager.segment(10, 100, 0);
        assert_eq!(first, ChunkSegment { index: 0, offset_in_chunk: 10, len: 22, buf_offset: 0 });

        let middle = manager.segment(10, 100, 1);
        assert_eq!(middle, ChunkSegment { index: 1, offset_in_chunk: 0, len: 32, buf_offset: 22 });

        let last = manager.segment(10, 100, 3);
        assert_eq!(last, ChunkSegment { index: 3, offset_in_chunk: 0, len: 14, buf_offset: 86 });

        let total: u64 = (0..4).map(|i| manager.segment(10, 100, i).len).sum();
        assert_eq!(total, 100);
    }
}
