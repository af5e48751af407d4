#![deny(warnings)]

//! Core domain models and invariants for the journey.
//!
//! This crate defines the serializable step records that make up the journey
//! catalog, together with validation helpers that guarantee the ordering
//! invariants every other crate relies on.

pub mod i18n;

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

pub use i18n::{t, Lang, SECRET_MESSAGE_COUNT};

/// Built-in catalog shipped with the app.
const BUILTIN_CATALOG: &str = include_str!("../../../assets/journey.yaml");

/// Unique identifier for a journey step, e.g. "sarajevo".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for StepId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Text available in every supported language.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiText {
    pub en: String,
    pub ru: String,
}

impl BiText {
    pub fn get(&self, lang: Lang) -> &str {
        match lang {
            Lang::En => &self.en,
            Lang::Ru => &self.ru,
        }
    }
}

/// One answer of a step quiz.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuizOption {
    pub text: BiText,
    pub is_correct: bool,
}

/// Multiple-choice question attached to a step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub question: BiText,
    pub options: Vec<QuizOption>,
}

impl Quiz {
    /// Whether `index` names the correct option. Out-of-range indices are wrong.
    pub fn is_correct(&self, index: usize) -> bool {
        self.options.get(index).is_some_and(|o| o.is_correct)
    }

    pub fn correct_index(&self) -> Option<usize> {
        self.options.iter().position(|o| o.is_correct)
    }
}

/// Placement of the hidden heart on the step's first photo, in percent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeartSpot {
    pub x_percent: f32,
    pub y_percent: f32,
}

/// A single stage of the journey.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Stable identity, used as persisted key material.
    pub id: StepId,
    /// Position in the journey, starting at 1.
    pub order: u32,
    pub city: BiText,
    pub country: BiText,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    pub card_text: BiText,
    pub love_letter: BiText,
    pub quiz: Quiz,
    /// Photo file names, first one is the hero image.
    pub photos: Vec<String>,
    pub hidden_heart: HeartSpot,
}

/// Validation errors for catalog invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// The catalog has no steps.
    #[error("catalog must contain at least one step")]
    EmptyCatalog,
    /// Id is empty or contains characters outside `[a-z0-9_-]`.
    #[error("invalid step id: {0:?}")]
    InvalidId(String),
    /// Two steps share an id.
    #[error("duplicate step id: {0}")]
    DuplicateId(String),
    /// Orders must be exactly `1..=n`.
    #[error("step order {found} breaks the sequence, expected {expected}")]
    OrderGap { expected: u32, found: u32 },
    /// Quiz has no options or not exactly one correct option.
    #[error("quiz of step {id} has {correct} correct options out of {total}")]
    InvalidQuiz {
        id: String,
        correct: usize,
        total: usize,
    },
    /// Coordinates outside the valid range.
    #[error("coordinates of step {0} are out of range")]
    CoordinatesOutOfRange(String),
    /// Heart placement outside `[0, 100]`.
    #[error("hidden heart of step {0} is outside the photo")]
    HeartOutOfRange(String),
}

/// Errors produced while loading a catalog document.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog document is malformed: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Validate a step identifier.
pub fn validate_step_id(id: &StepId) -> Result<(), ValidationError> {
    let ok = !id.0.is_empty()
        && id
            .0
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !ok {
        return Err(ValidationError::InvalidId(id.0.clone()));
    }
    Ok(())
}

/// Validate a single step in isolation.
pub fn validate_step(step: &Step) -> Result<(), ValidationError> {
    validate_step_id(&step.id)?;
    let correct = step.quiz.options.iter().filter(|o| o.is_correct).count();
    if step.quiz.options.is_empty() || correct != 1 {
        return Err(ValidationError::InvalidQuiz {
            id: step.id.0.clone(),
            correct,
            total: step.quiz.options.len(),
        });
    }
    if !(step.lat.is_finite() && step.lng.is_finite())
        || !(-90.0..=90.0).contains(&step.lat)
        || !(-180.0..=180.0).contains(&step.lng)
    {
        return Err(ValidationError::CoordinatesOutOfRange(step.id.0.clone()));
    }
    let spot = step.hidden_heart;
    if !(0.0..=100.0).contains(&spot.x_percent) || !(0.0..=100.0).contains(&spot.y_percent) {
        return Err(ValidationError::HeartOutOfRange(step.id.0.clone()));
    }
    Ok(())
}

#[derive(Deserialize)]
struct CatalogFile {
    steps: Vec<Step>,
}

/// Ordered, validated, read-only list of journey steps.
#[derive(Clone, Debug)]
pub struct Catalog {
    steps: Vec<Step>,
    index: BTreeMap<StepId, usize>,
}

impl Catalog {
    /// Build a catalog, checking ids and that orders form `1..=n`.
    pub fn new(mut steps: Vec<Step>) -> Result<Self, ValidationError> {
        if steps.is_empty() {
            return Err(ValidationError::EmptyCatalog);
        }
        steps.sort_by_key(|s| s.order);
        let mut index = BTreeMap::new();
        for (i, step) in steps.iter().enumerate() {
            validate_step(step)?;
            let expected = i as u32 + 1;
            if step.order != expected {
                return Err(ValidationError::OrderGap {
                    expected,
                    found: step.order,
                });
            }
            if index.insert(step.id.clone(), i).is_some() {
                return Err(ValidationError::DuplicateId(step.id.0.clone()));
            }
        }
        Ok(Self { steps, index })
    }

    /// Parse and validate a YAML document with a top-level `steps` list.
    pub fn from_yaml(text: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_yaml::from_str(text)?;
        let catalog = Self::new(file.steps)?;
        debug!(steps = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_yaml(BUILTIN_CATALOG)
    }

    /// Steps in ascending order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub fn by_order(&self, order: u32) -> Option<&Step> {
        let i = order.checked_sub(1)? as usize;
        self.steps.get(i)
    }

    /// The step immediately before `step`, if any.
    pub fn predecessor(&self, step: &Step) -> Option<&Step> {
        self.by_order(step.order.checked_sub(1)?)
    }

    /// The step with `order = 1`.
    pub fn first(&self) -> &Step {
        &self.steps[0]
    }

    pub fn ids(&self) -> impl Iterator<Item = &StepId> {
        self.steps.iter().map(|s| &s.id)
    }
}
