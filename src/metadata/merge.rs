//! Merge operands for metadata records
//!
//! Writers never read-modify-write a record. They hand the key-value store a
//! small serialized operand and the store folds it into the stored record under
//! its own lock, returning the folded value. Operand wire format:
//!
//! - `i:<size>,t` / `i:<size>,f`: increase size (append / watermark)
//! - `d:<size>`: set size to exactly `<size>` (shrink-truncate)
//! - `c:<record>`: create with `<record>` when the key is absent
//! - `u:<record>`: replace every field of the stored record except the size

use super::types::{Metadata, MetadataFields};
use super::{MetadataError, MetadataResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOperand {
    /// `append` なら `size += delta`、そうでなければ `size = max(size, delta)`
    IncreaseSize { delta: u64, append: bool },

    /// サイズを `size` にそのまま設定
    DecreaseSize { size: u64 },

    /// キーが無ければ `record` を基底にする。既存レコードには何もしない
    Create { record: String },

    /// サイズ以外の属性を置き換える
    UpdateAttributes { record: String },
}

impl MergeOperand {
    pub fn serialize(&self) -> String {
        match self {
            Self::IncreaseSize { delta, append } => {
                format!("i:{},{}", delta, if *append { 't' } else { 'f' })
            }
            Self::DecreaseSize { size } => format!("d:{}", size),
            Self::Create { record } => format!("c:{}", record),
            Self::UpdateAttributes { record } => format!("u:{}", record),
        }
    }

    pub fn deserialize(raw: &str) -> MetadataResult<Self> {
        let invalid = || MetadataError::InvalidOperand(raw.to_string());
        let (tag, body) = raw.split_once(':').ok_or_else(invalid)?;

        match tag {
            "i" => {
                let (delta, flag) = body.split_once(',').ok_or_else(invalid)?;
                let delta = delta.parse().map_err(|_| invalid())?;
                let append = match flag {
                    "t" => true,
                    "f" => false,
                    _ => return Err(invalid()),
                };
                Ok(Self::IncreaseSize { delta, append })
            }
            "d" => Ok(Self::DecreaseSize {
                size: body.parse().map_err(|_| invalid())?,
            }),
            "c" => Ok(Self::Create {
                record: body.to_string(),
            }),
            "u" => Ok(Self::UpdateAttributes {
                record: body.to_string(),
            }),
            _ => Err(invalid()),
        }
    }
}

/// Folds operands into a stored record
#[derive(Debug, Clone, Copy)]
pub struct MetadataMergeOperator {
    fields: MetadataFields,
}

impl MetadataMergeOperator {
    pub fn new(fields: MetadataFields) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &MetadataFields {
        &self.fields
    }

    /// Apply `operands` in arrival order on top of `existing`
    ///
    /// Size operands on an absent key fail with `NotFound`.
    pub fn full_merge(
        &self,
        key: &str,
        existing: Option<&str>,
        operands: &[MergeOperand],
    ) -> MetadataResult<String> {
        let mut current = existing
            .map(|record| Metadata::deserialize(record, &self.fields))
            .transpose()?;

        for operand in operands {
            current = Some(match (current, operand) {
                (None, MergeOperand::Create { record }) => {
                    Metadata::deserialize(record, &self.fields)?
                }
                (Some(md), MergeOperand::Create { .. }) => md,
                (None, _) => return Err(MetadataError::NotFound(key.to_string())),
                (Some(mut md), MergeOperand::IncreaseSize { delta, append }) => {
                    md.size = if *append {
                        md.size.saturating_add(*delta)
                    } else {
                        md.size.max(*delta)
                    };
                    md
                }
                (Some(mut md), MergeOperand::DecreaseSize { size }) => {
                    md.size = *size;
                    md
                }
                (Some(mut md), MergeOperand::UpdateAttributes { record }) => {
                    let update = Metadata::deserialize(record, &self.fields)?;
                    md.apply_attributes(&update, &self.fields);
                    md
                }
            });
        }

        current
            .map(|md| md.serialize(&self.fields))
            .ok_or_else(|| MetadataError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator() -> MetadataMergeOperator {
        MetadataMergeOperator::new(MetadataFields::default())
    }

    fn size_of(record: &str) -> u64 {
        Metadata::deserialize(record, &MetadataFields::default())
            .unwrap()
            .size
    }

    #[test]
    fn test_operand_wire_format() {
        let cases = [
            (MergeOperand::IncreaseSize { delta: 10, append: true }, "i:10,t"),
            (MergeOperand::IncreaseSize { delta: 7, append: false }, "i:7,f"),
            (MergeOperand::DecreaseSize { size: 3 }, "d:3"),
            (MergeOperand::Create { record: "33188|0".into() }, "c:33188|0"),
        ];
        for (operand, wire) in cases {
            assert_eq!(operand.serialize(), wire);
            assert_eq!(MergeOperand::deserialize(wire).unwrap(), operand);
        }
        assert!(MergeOperand::deserialize("i:10").is_err());
        assert!(MergeOperand::deserialize("i:10,x").is_err());
        assert!(MergeOperand::deserialize("z:1").is_err());
        assert!(MergeOperand::deserialize("nocolon").is_err());
    }

    #[test]
    fn test_append_increases_commute() {
        let op = operator();
        let a = MergeOperand::IncreaseSize { delta: 100, append: true };
        let b = MergeOperand::IncreaseSize { delta: 50, append: true };

        let ab = op.full_merge("/f", Some("33188|0"), &[a.clone(), b.clone()]).unwrap();
        let ba = op.full_merge("/f", Some("33188|0"), &[b, a]).unwrap();
        assert_eq!(size_of(&ab), 150);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_non_append_takes_watermark() {
        let op = operator();
        let out = op
            .full_merge(
                "/f",
                Some("33188|100"),
                &[
                    MergeOperand::IncreaseSize { delta: 40, append: false },
                    MergeOperand::IncreaseSize { delta: 120, append: false },
                    MergeOperand::IncreaseSize { delta: 80, append: false },
                ],
            )
            .unwrap();
        assert_eq!(size_of(&out), 120);
    }

    #[test]
    fn test_decrease_sets_exact_size() {
        let op = operator();
        let out = op
            .full_merge("/f", Some("33188|120"), &[MergeOperand::DecreaseSize { size: 45 }])
            .unwrap();
        assert_eq!(size_of(&out), 45);
    }

    #[test]
    fn test_create_semantics() {
        let op = operator();
        let create = MergeOperand::Create { record: "33188|0".into() };

        // キーが無ければ作成
        let out = op.full_merge("/f", None, &[create.clone()]).unwrap();
        assert_eq!(out, "33188|0");

        // 既存レコードには影響しない (二重適用なし)
        let out = op.full_merge("/f", Some("33188|77"), &[create.clone(), create]).unwrap();
        assert_eq!(size_of(&out), 77);
    }

    #[test]
    fn test_size_update_on_missing_key() {
        let op = operator();
        let err = op
            .full_merge("/missing", None, &[MergeOperand::IncreaseSize { delta: 1, append: true }])
            .unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }

    #[test]
    fn test_update_attributes_keeps_size() {
        let op = MetadataMergeOperator::new(MetadataFields::all());
        let update = Metadata {
            mode: 0o100600,
            size: 1,
            mtime: 99,
            ..Default::default()
        };
        let out = op
            .full_merge(
                "/f",
                Some("33188|500|1|1|1|0|0|1|0"),
                &[MergeOperand::UpdateAttributes {
                    record: update.serialize(op.fields()),
                }],
            )
            .unwrap();
        let md = Metadata::deserialize(&out, op.fields()).unwrap();
        assert_eq!(md.size, 500);
        assert_eq!(md.mode, 0o100600);
        assert_eq!(md.mtime, 99);
    }
}
