//! Catalog records: manuscripts, blog posts, comments, and guestbook entries.
//!
//! Field names on the wire follow the catalog's stored schema (Indonesian
//! column names for manuscripts, `post_id` / `isApproved` for moderated
//! records); the Rust side uses descriptive English names.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::store::{Row, Table};

/// Reads a stored row into its typed record.
pub fn from_row<T: DeserializeOwned>(table: Table, row: Row) -> Result<T> {
    serde_json::from_value(Value::Object(row)).map_err(|e| Error::Decode {
        table: table.name(),
        message: e.to_string(),
    })
}

/// Serializes a payload into the row shape backends accept.
pub fn to_row<T: Serialize>(table: Table, value: &T) -> Result<Row> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(Error::Decode {
            table: table.name(),
            message: format!("expected an object, got {other}"),
        }),
        Err(e) => Err(Error::Decode {
            table: table.name(),
            message: e.to_string(),
        }),
    }
}

/// Raised when a closed-vocabulary value does not match any variant exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} value: {:?}", self.field, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Declares a closed vocabulary: a fieldless enum whose stored spelling is
/// matched exactly (case-sensitive) in both directions.
macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident, field = $field:literal {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
            /// Stored column name.
            pub const FIELD: &'static str = $field;

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        field: $field,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

vocabulary! {
    /// Whether the physical manuscript can be consulted.
    Availability, field = "statusKetersediaan" {
        Available => "Tersedia",
        Borrowed => "Dipinjam",
        UnderRestoration => "Restorasi",
    }
}

vocabulary! {
    Completeness, field = "kelengkapan" {
        Complete => "Lengkap",
        Incomplete => "Tidak Lengkap",
    }
}

vocabulary! {
    /// How readable the text is.
    Legibility, field = "keterbacaan" {
        Good => "Baik",
        Fair => "Cukup",
        Poor => "Kurang",
    }
}

/// Everything an admin supplies for a manuscript: the creation payload and
/// the full-record edit payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManuscriptFields {
    #[serde(rename = "kodeInventarisasi")]
    pub inventory_code: String,
    #[serde(rename = "kodeDigital", default, skip_serializing_if = "Option::is_none")]
    pub digital_code: Option<String>,
    #[serde(rename = "judul")]
    pub title: String,
    #[serde(rename = "pengarang")]
    pub author: String,
    #[serde(rename = "penyalin", default, skip_serializing_if = "Option::is_none")]
    pub transcriber: Option<String>,
    #[serde(rename = "tahunPenyalinan", default, skip_serializing_if = "Option::is_none")]
    pub year_copied: Option<String>,
    #[serde(rename = "statusKetersediaan")]
    pub availability: Availability,
    #[serde(rename = "kelengkapan")]
    pub completeness: Completeness,
    #[serde(rename = "keterbacaan")]
    pub legibility: Legibility,
    #[serde(rename = "kategori", default)]
    pub categories: Vec<String>,
    #[serde(rename = "bahasa", default)]
    pub languages: Vec<String>,
    #[serde(rename = "aksara", default)]
    pub scripts: Vec<String>,
    #[serde(rename = "jumlahHalaman")]
    pub page_count: u32,
    #[serde(rename = "tinta", default, skip_serializing_if = "Option::is_none")]
    pub ink: Option<String>,
    #[serde(rename = "kondisiNaskah", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(rename = "deskripsi")]
    pub description: String,
    #[serde(rename = "kolofon", default, skip_serializing_if = "Option::is_none")]
    pub colophon: Option<String>,
    #[serde(rename = "catatan", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(rename = "thumbnailUrl", default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(rename = "imageUrls", default)]
    pub image_urls: Vec<String>,
    #[serde(
        rename = "googleDriveFolderUrl",
        alias = "googledrivefolderurl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub drive_folder_url: Option<String>,
}

impl Default for ManuscriptFields {
    fn default() -> Self {
        Self {
            inventory_code: String::new(),
            digital_code: None,
            title: String::new(),
            author: String::new(),
            transcriber: None,
            year_copied: None,
            availability: Availability::Available,
            completeness: Completeness::Complete,
            legibility: Legibility::Good,
            categories: Vec::new(),
            languages: Vec::new(),
            scripts: Vec::new(),
            page_count: 0,
            ink: None,
            condition: None,
            description: String::new(),
            colophon: None,
            notes: None,
            thumbnail_url: None,
            image_urls: Vec::new(),
            drive_folder_url: None,
        }
    }
}

/// A persisted manuscript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manuscript {
    pub id: String,
    #[serde(flatten)]
    pub fields: ManuscriptFields,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlogPostFields {
    pub title: String,
    pub author: String,
    pub excerpt: String,
    /// HTML body.
    pub content: String,
    #[serde(rename = "thumbnailUrl", default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlogPost {
    pub id: String,
    #[serde(flatten)]
    pub fields: BlogPostFields,
    pub date: DateTime<Utc>,
    /// Attached by the access module; never stored on the post row.
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author: String,
    pub text: String,
    pub date: DateTime<Utc>,
    #[serde(rename = "isApproved")]
    pub is_approved: bool,
}

/// A public comment submission. There is deliberately no approval field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComment {
    pub author: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestBookEntry {
    pub id: String,
    pub name: String,
    pub message: String,
    pub date: DateTime<Utc>,
    #[serde(rename = "isApproved")]
    pub is_approved: bool,
}

/// A public guestbook submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGuestBookEntry {
    pub name: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vocabularies_match_exactly() {
        assert_eq!("Tersedia".parse::<Availability>(), Ok(Availability::Available));
        assert_eq!(
            "Tidak Lengkap".parse::<Completeness>(),
            Ok(Completeness::Incomplete)
        );
        let err = "baik".parse::<Legibility>().unwrap_err();
        assert_eq!(err.field, "keterbacaan");
        assert_eq!(err.value, "baik");
        assert!("Hilang".parse::<Availability>().is_err());
    }

    #[test]
    fn manuscript_reads_stored_column_names() {
        let m: Manuscript = serde_json::from_value(json!({
            "id": "m1",
            "kodeInventarisasi": "TPPKPQ-MS-001",
            "judul": "Kitab Al-Hikam",
            "pengarang": "Ibn 'Athaillah",
            "statusKetersediaan": "Dipinjam",
            "kelengkapan": "Lengkap",
            "keterbacaan": "Cukup",
            "kategori": ["Tasawuf"],
            "jumlahHalaman": 150,
            "deskripsi": "Kumpulan hikmah",
            "googledrivefolderurl": "https://drive.example/f",
            "created_at": "2024-01-01T00:00:00.000000Z"
        }))
        .unwrap();
        assert_eq!(m.fields.availability, Availability::Borrowed);
        assert_eq!(m.fields.categories, vec!["Tasawuf"]);
        assert!(m.fields.languages.is_empty());
        assert_eq!(
            m.fields.drive_folder_url.as_deref(),
            Some("https://drive.example/f")
        );
        assert!(m.updated_at.is_none());
    }

    #[test]
    fn new_comment_ignores_smuggled_approval() {
        let c: NewComment = serde_json::from_value(json!({
            "author": "Pembaca",
            "text": "Bagus",
            "isApproved": true
        }))
        .unwrap();
        let row = serde_json::to_value(&c).unwrap();
        assert!(row.get("isApproved").is_none());
    }
}
