//! JSON output for quiz reviews.
//!
//! [`JsonGenerator`] serializes a [`Review`] either as compact single-line JSON
//! (what the HTTP API returns) or pretty-printed for files a student keeps.
//!
//! # Example
//!
//! ```rust
//! use studyhub_review::{Review, json::JsonGenerator};
//!
//! let review = Review::default();
//! let generator = JsonGenerator::new(&review);
//!
//! let compact = generator.generate().unwrap();
//! assert!(!compact.contains('\n'));
//!
//! // generator.write_to_file(std::path::Path::new("quiz-review.json"), true).unwrap();
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::{Result, Review, ReviewError};

/// JSON review generator.
pub struct JsonGenerator<'a> {
    review: &'a Review,
}

impl<'a> JsonGenerator<'a> {
    /// Creates a new JSON generator for the given review.
    #[must_use]
    pub const fn new(review: &'a Review) -> Self {
        Self { review }
    }

    /// Generates compact JSON output.
    pub fn generate(&self) -> Result<String> {
        serde_json::to_string(self.review).map_err(ReviewError::from)
    }

    /// Generates pretty-printed JSON output with two-space indentation.
    pub fn generate_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self.review).map_err(ReviewError::from)
    }

    /// Writes the review to `path`, creating or overwriting the file.
    ///
    /// Parent directories must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::Serialization`] if serialization fails and
    /// [`ReviewError::Io`] if the file cannot be written.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            self.generate_pretty()?
        } else {
            self.generate()?
        };

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}
