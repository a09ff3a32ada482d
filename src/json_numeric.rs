//! NaN/±Infinity-preserving JSON encoding (SPEC_FULL §11).
//!
//! `serde_json` maps non-finite `f64`s to `null` — the wire format §6 demands
//! cannot silently drop them ("NaN and ±Infinity must be preserved literally").
//! The original Python service gets this for free because `json.dumps` happily
//! emits bare `NaN`/`Infinity`/`-Infinity` tokens (`server/json_response.py`).
//! `serde_json` has no equivalent switch, so `JsonFloat` serializes non-finite
//! values as unique sentinel strings and `to_string_preserving_non_finite` does
//! a single text-level substitution back to the bare IEEE literal tokens after
//! serialization. This is the one escape hatch into text surgery in the crate;
//! everywhere else serde does the work.

use serde::{Serialize, Serializer};

const NAN_SENTINEL: &str = "\u{0}__epstats_nan__\u{0}";
const POS_INF_SENTINEL: &str = "\u{0}__epstats_inf__\u{0}";
const NEG_INF_SENTINEL: &str = "\u{0}__epstats_neg_inf__\u{0}";

/// A wire-level float that survives NaN/±Infinity through JSON encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JsonFloat(pub f64);

impl From<f64> for JsonFloat {
    fn from(v: f64) -> Self {
        JsonFloat(v)
    }
}

impl Serialize for JsonFloat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_nan() {
            serializer.serialize_str(NAN_SENTINEL)
        } else if self.0 == f64::INFINITY {
            serializer.serialize_str(POS_INF_SENTINEL)
        } else if self.0 == f64::NEG_INFINITY {
            serializer.serialize_str(NEG_INF_SENTINEL)
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

/// Serialize `value`, then replace the sentinel strings with bare `NaN` /
/// `Infinity` / `-Infinity` tokens (non-standard JSON, matching §6's explicit
/// license to "preserve them literally").
pub fn to_string_preserving_non_finite<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let raw = serde_json::to_string(value)?;
    Ok(patch_sentinels(&raw))
}

fn patch_sentinels(raw: &str) -> String {
    raw.replace(&format!("\"{NAN_SENTINEL}\""), "NaN")
        .replace(&format!("\"{POS_INF_SENTINEL}\""), "Infinity")
        .replace(&format!("\"{NEG_INF_SENTINEL}\""), "-Infinity")
}
