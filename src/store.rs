// src/store.rs - durable gesture, sample, and action-binding records
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::gesture::{Kind, PathPoint, Template, TemplateData};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("store data: {0}")]
    Data(#[from] serde_json::Error),
    #[error("gesture not found: {0}")]
    GestureNotFound(String),
    #[error("malformed template {id}: {reason}")]
    MalformedTemplate { id: String, reason: String },
}

/// A stored landmark coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<Vector3<f64>> for Landmark {
    fn from(v: Vector3<f64>) -> Self {
        Self { x: v.x, y: v.y, z: v.z }
    }
}

impl From<Landmark> for Vector3<f64> {
    fn from(l: Landmark) -> Self {
        Vector3::new(l.x, l.y, l.z)
    }
}

/// A stored gesture definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GestureRecord {
    pub id: String,
    pub name: String,
    pub kind: Kind,
    pub tolerance: f64,
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
    #[serde(default)]
    pub path: Vec<PathPoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GestureRecord {
    pub fn new_static(name: impl Into<String>, tolerance: f64, landmarks: Vec<Vector3<f64>>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            kind: Kind::Static,
            tolerance,
            landmarks: landmarks.into_iter().map(Landmark::from).collect(),
            path: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_dynamic(name: impl Into<String>, tolerance: f64, path: Vec<PathPoint>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            kind: Kind::Dynamic,
            tolerance,
            landmarks: Vec::new(),
            path,
            created_at: now,
            updated_at: now,
        }
    }

    /// Converts the record into a matcher template, rejecting malformed
    /// payloads so they can never be matched against.
    pub fn to_template(&self) -> Result<Template, StoreError> {
        let data = match self.kind {
            Kind::Static => {
                if self.landmarks.len() != crate::landmarks::NUM_LANDMARKS {
                    return Err(StoreError::MalformedTemplate {
                        id: self.id.clone(),
                        reason: format!("expected {} landmarks, found {}",
                            crate::landmarks::NUM_LANDMARKS, self.landmarks.len()),
                    });
                }
                TemplateData::Static(self.landmarks.iter().copied().map(Vector3::from).collect())
            }
            Kind::Dynamic => {
                if self.path.len() < 2 {
                    return Err(StoreError::MalformedTemplate {
                        id: self.id.clone(),
                        reason: format!("path has {} points, need at least 2", self.path.len()),
                    });
                }
                TemplateData::Dynamic(self.path.clone())
            }
        };

        Ok(Template { id: self.id.clone(), name: self.name.clone(), tolerance: self.tolerance, data })
    }
}

/// A stored gesture-to-action binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub gesture_id: String,
    pub plugin: String,
    pub action: String,
    #[serde(default)]
    pub config: Value,
    pub enabled: bool,
}

impl ActionRecord {
    pub fn new(gesture_id: impl Into<String>, plugin: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            gesture_id: gesture_id.into(),
            plugin: plugin.into(),
            action: action.into(),
            config: Value::Null,
            enabled: true,
        }
    }
}

/// A recorded training sample for a gesture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    pub id: String,
    pub gesture_id: String,
    pub kind: Kind,
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
    #[serde(default)]
    pub path: Vec<PathPoint>,
    pub recorded_at: DateTime<Utc>,
}

impl SampleRecord {
    pub fn new_static(gesture_id: impl Into<String>, landmarks: Vec<Vector3<f64>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            gesture_id: gesture_id.into(),
            kind: Kind::Static,
            landmarks: landmarks.into_iter().map(Landmark::from).collect(),
            path: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn new_dynamic(gesture_id: impl Into<String>, path: Vec<PathPoint>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            gesture_id: gesture_id.into(),
            kind: Kind::Dynamic,
            landmarks: Vec::new(),
            path,
            recorded_at: Utc::now(),
        }
    }
}

/// Read access to stored gesture templates.
pub trait TemplateStore: Send + Sync {
    fn list_by_kind(&self, kind: Kind) -> Result<Vec<GestureRecord>, StoreError>;
}

/// Read access to gesture-to-action bindings.
pub trait BindingStore: Send + Sync {
    fn get_by_gesture_id(&self, gesture_id: &str) -> Result<Option<ActionRecord>, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    gestures: Vec<GestureRecord>,
    #[serde(default)]
    actions: Vec<ActionRecord>,
    #[serde(default)]
    samples: Vec<SampleRecord>,
}

/// Stores everything in a single JSON document.
///
/// Saves rewrite the file atomically (temp file + rename). A store without
/// a path lives in memory only, which is what tests use.
pub struct JsonStore {
    path: Option<PathBuf>,
    doc: RwLock<Document>,
}

impl JsonStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = if path.exists() {
            serde_json::from_slice(&std::fs::read(&path)?)?
        } else {
            Document::default()
        };
        Ok(Self { path: Some(path), doc: RwLock::new(doc) })
    }

    pub fn in_memory() -> Self {
        Self { path: None, doc: RwLock::new(Document::default()) }
    }

    fn save(&self, doc: &Document) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(doc)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn add_gesture(&self, record: GestureRecord) -> Result<(), StoreError> {
        let mut doc = self.doc.write().unwrap();
        doc.gestures.push(record);
        self.save(&doc)
    }

    /// Replaces an existing gesture definition, bumping its update time.
    pub fn update_gesture(&self, mut record: GestureRecord) -> Result<(), StoreError> {
        let mut doc = self.doc.write().unwrap();
        let slot = doc
            .gestures
            .iter_mut()
            .find(|g| g.id == record.id)
            .ok_or_else(|| StoreError::GestureNotFound(record.id.clone()))?;
        record.updated_at = Utc::now();
        *slot = record;
        self.save(&doc)
    }

    /// Removes a gesture along with its samples and action bindings.
    pub fn remove_gesture(&self, id: &str) -> Result<(), StoreError> {
        let mut doc = self.doc.write().unwrap();
        doc.gestures.retain(|g| g.id != id);
        doc.samples.retain(|s| s.gesture_id != id);
        doc.actions.retain(|a| a.gesture_id != id);
        self.save(&doc)
    }

    pub fn get_gesture(&self, id: &str) -> Result<Option<GestureRecord>, StoreError> {
        Ok(self.doc.read().unwrap().gestures.iter().find(|g| g.id == id).cloned())
    }

    pub fn list_gestures(&self) -> Result<Vec<GestureRecord>, StoreError> {
        Ok(self.doc.read().unwrap().gestures.clone())
    }

    /// Adds or replaces the binding for the record's gesture.
    pub fn upsert_action(&self, record: ActionRecord) -> Result<(), StoreError> {
        let mut doc = self.doc.write().unwrap();
        doc.actions.retain(|a| a.gesture_id != record.gesture_id);
        doc.actions.push(record);
        self.save(&doc)
    }

    pub fn remove_action(&self, id: &str) -> Result<(), StoreError> {
        let mut doc = self.doc.write().unwrap();
        doc.actions.retain(|a| a.id != id);
        self.save(&doc)
    }

    pub fn add_sample(&self, record: SampleRecord) -> Result<(), StoreError> {
        let mut doc = self.doc.write().unwrap();
        doc.samples.push(record);
        self.save(&doc)
    }

    pub fn samples_for(&self, gesture_id: &str) -> Result<Vec<SampleRecord>, StoreError> {
        Ok(self
            .doc
            .read()
            .unwrap()
            .samples
            .iter()
            .filter(|s| s.gesture_id == gesture_id)
            .cloned()
            .collect())
    }
}

impl TemplateStore for JsonStore {
    fn list_by_kind(&self, kind: Kind) -> Result<Vec<GestureRecord>, StoreError> {
        Ok(self
            .doc
            .read()
            .unwrap()
            .gestures
            .iter()
            .filter(|g| g.kind == kind)
            .cloned()
            .collect())
    }
}

impl BindingStore for JsonStore {
    fn get_by_gesture_id(&self, gesture_id: &str) -> Result<Option<ActionRecord>, StoreError> {
        Ok(self
            .doc
            .read()
            .unwrap()
            .actions
            .iter()
            .find(|a| a.gesture_id == gesture_id)
            .cloned())
    }
}
