//! Typed values bound by the script DSL.
//!
//! Every value a script can produce or consume is one [`Item`] variant, and
//! every operation declares the [`ItemType`] tags it accepts and returns so
//! the parser can resolve overloads before anything executes.

use std::fmt;

use crate::error::{Result, ScriptError};
use crate::histogram::Histogram;
use crate::image::Image;

/// Type tag of an [`Item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    Invalid,
    SignedInteger,
    Real,
    Characters,
    GrayImage,
    RgbImage,
    Histogram,
    List,
}

impl ItemType {
    /// Whether the tag names one of the image variants.
    pub fn is_image(self) -> bool {
        matches!(self, ItemType::GrayImage | ItemType::RgbImage)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemType::Invalid => "invalid",
            ItemType::SignedInteger => "integer",
            ItemType::Real => "real",
            ItemType::Characters => "characters",
            ItemType::GrayImage => "gray-8bit-image",
            ItemType::RgbImage => "rgb-8bit-image",
            ItemType::Histogram => "histogram",
            ItemType::List => "list",
        };
        f.write_str(name)
    }
}

/// A typed script value.
#[derive(Debug, Clone)]
pub enum Item {
    Invalid,
    SignedInteger(i32),
    Real(f64),
    Characters(String),
    GrayImage(Image),
    RgbImage(Image),
    Histogram(Histogram),
    List(Vec<Item>),
}

impl Item {
    /// Wrap an image in the matching variant for its channel count.
    pub fn from_image(image: Image) -> Self {
        if image.is_gray() {
            Item::GrayImage(image)
        } else {
            Item::RgbImage(image)
        }
    }

    pub fn item_type(&self) -> ItemType {
        match self {
            Item::Invalid => ItemType::Invalid,
            Item::SignedInteger(_) => ItemType::SignedInteger,
            Item::Real(_) => ItemType::Real,
            Item::Characters(_) => ItemType::Characters,
            Item::GrayImage(_) => ItemType::GrayImage,
            Item::RgbImage(_) => ItemType::RgbImage,
            Item::Histogram(_) => ItemType::Histogram,
            Item::List(_) => ItemType::List,
        }
    }

    /// Borrow the contained image, whatever its channel count.
    pub fn as_image(&self) -> Result<&Image> {
        match self {
            Item::GrayImage(img) | Item::RgbImage(img) => Ok(img),
            other => Err(ScriptError::Evaluate {
                operation: "item".into(),
                message: format!("expected an image, got {}", other.item_type()),
            }),
        }
    }

    /// Take the contained image, whatever its channel count.
    pub fn into_image(self) -> Result<Image> {
        match self {
            Item::GrayImage(img) | Item::RgbImage(img) => Ok(img),
            other => Err(ScriptError::Evaluate {
                operation: "item".into(),
                message: format!("expected an image, got {}", other.item_type()),
            }),
        }
    }

    pub fn as_integer(&self) -> Result<i32> {
        match self {
            Item::SignedInteger(v) => Ok(*v),
            other => Err(ScriptError::Evaluate {
                operation: "item".into(),
                message: format!("expected an integer, got {}", other.item_type()),
            }),
        }
    }

    pub fn as_real(&self) -> Result<f64> {
        match self {
            Item::Real(v) => Ok(*v),
            Item::SignedInteger(v) => Ok(*v as f64),
            other => Err(ScriptError::Evaluate {
                operation: "item".into(),
                message: format!("expected a real, got {}", other.item_type()),
            }),
        }
    }

    pub fn as_characters(&self) -> Result<&str> {
        match self {
            Item::Characters(s) => Ok(s),
            other => Err(ScriptError::Evaluate {
                operation: "item".into(),
                message: format!("expected characters, got {}", other.item_type()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags_match_variants() {
        assert_eq!(Item::SignedInteger(3).item_type(), ItemType::SignedInteger);
        assert_eq!(
            Item::from_image(Image::new_gray(2, 2)).item_type(),
            ItemType::GrayImage
        );
        assert_eq!(
            Item::from_image(Image::new_rgb(2, 2)).item_type(),
            ItemType::RgbImage
        );
    }

    #[test]
    fn integer_coerces_to_real_only() {
        assert_eq!(Item::SignedInteger(2).as_real().unwrap(), 2.0);
        assert!(Item::Real(2.0).as_integer().is_err());
    }
}
