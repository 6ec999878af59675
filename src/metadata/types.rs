use serde::{Deserialize, Serialize};

use super::{MetadataError, MetadataResult};
use crate::constants::METADATA_FIELD_SEPARATOR;

/// チャンクID
pub type ChunkId = u64;

/// レコードに含める任意フィールド
///
/// クラスタ全体で共通の設定。ホスト間で食い違うとレコードを解釈できない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataFields {
    pub atime: bool,
    pub mtime: bool,
    pub ctime: bool,
    pub uid: bool,
    pub gid: bool,
    pub link_count: bool,
    pub blocks: bool,
}

impl MetadataFields {
    /// 全フィールド有効
    pub fn all() -> Self {
        Self {
            atime: true,
            mtime: true,
            ctime: true,
            uid: true,
            gid: true,
            link_count: true,
            blocks: true,
        }
    }

    /// いずれかのタイムスタンプが有効か
    pub fn any_time(&self) -> bool {
        self.atime || self.mtime || self.ctime
    }
}

/// ファイルメタデータレコード
///
/// 永続形式は `mode|size[|atime][|mtime][|ctime][|uid][|gid][|link_count][|blocks]`。
/// 無効なフィールドは出力されず、読み込み時は 0 になる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub mode: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub uid: u32,
    pub gid: u32,
    pub link_count: u64,
    pub blocks: u64,
}

impl Metadata {
    /// 新しいメタデータを作成
    pub fn new(mode: u32) -> Self {
        Self {
            mode,
            link_count: 1,
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// 有効なタイムスタンプを全て `now` にする
    pub fn stamp_times(&mut self, fields: &MetadataFields, now: i64) {
        if fields.atime {
            self.atime = now;
        }
        if fields.mtime {
            self.mtime = now;
        }
        if fields.ctime {
            self.ctime = now;
        }
    }

    /// サイズ以外の有効フィールドを `other` からコピー
    pub fn apply_attributes(&mut self, other: &Metadata, fields: &MetadataFields) {
        self.mode = other.mode;
        if fields.atime {
            self.atime = other.atime;
        }
        if fields.mtime {
            self.mtime = other.mtime;
        }
        if fields.ctime {
            self.ctime = other.ctime;
        }
        if fields.uid {
            self.uid = other.uid;
        }
        if fields.gid {
            self.gid = other.gid;
        }
        if fields.link_count {
            self.link_count = other.link_count;
        }
        if fields.blocks {
            self.blocks = other.blocks;
        }
    }

    /// レコード文字列にシリアライズ
    pub fn serialize(&self, fields: &MetadataFields) -> String {
        let sep = METADATA_FIELD_SEPARATOR;
        let mut out = format!("{}{}{}", self.mode, sep, self.size);

        let optional: [(bool, String); 7] = [
            (fields.atime, self.atime.to_string()),
            (fields.mtime, self.mtime.to_string()),
            (fields.ctime, self.ctime.to_string()),
            (fields.uid, self.uid.to_string()),
            (fields.gid, self.gid.to_string()),
            (fields.link_count, self.link_count.to_string()),
            (fields.blocks, self.blocks.to_string()),
        ];
        for (enabled, value) in optional {
            if enabled {
                out.push(sep);
                out.push_str(&value);
            }
        }
        out
    }

    /// レコード文字列からデシリアライズ
    pub fn deserialize(record: &str, fields: &MetadataFields) -> MetadataResult<Self> {
        let mut parts = record.split(METADATA_FIELD_SEPARATOR);
        let corrupt = |reason: &str| MetadataError::Corrupt {
            record: record.to_string(),
            reason: reason.to_string(),
        };

        fn field<T: std::str::FromStr>(
            parts: &mut std::str::Split<'_, char>,
            name: &str,
        ) -> Result<T, String> {
            let raw = parts.next().ok_or_else(|| format!("missing field `{}`", name))?;
            raw.parse()
                .map_err(|_| format!("field `{}` is not a number: {:?}", name, raw))
        }

        let mut md = Metadata {
            mode: field(&mut parts, "mode").map_err(|e| corrupt(&e))?,
            size: field(&mut parts, "size").map_err(|e| corrupt(&e))?,
            ..Default::default()
        };

        if fields.atime {
            md.atime = field(&mut parts, "atime").map_err(|e| corrupt(&e))?;
        }
        if fields.mtime {
            md.mtime = field(&mut parts, "mtime").map_err(|e| corrupt(&e))?;
        }
        if fields.ctime {
            md.ctime = field(&mut parts, "ctime").map_err(|e| corrupt(&e))?;
        }
        if fields.uid {
            md.uid = field(&mut parts, "uid").map_err(|e| corrupt(&e))?;
        }
        if fields.gid {
            md.gid = field(&mut parts, "gid").map_err(|e| corrupt(&e))?;
        }
        if fields.link_count {
            md.link_count = field(&mut parts, "link_count").map_err(|e| corrupt(&e))?;
        }
        if fields.blocks {
            md.blocks = field(&mut parts, "blocks").map_err(|e| corrupt(&e))?;
        }

        if parts.next().is_some() {
            return Err(corrupt("trailing fields"));
        }
        Ok(md)
    }
}
