use crate::infrastructure::bluetooth::protocol::{SCENE_LAST, SCENE_OFF};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub id: u8,
    pub name: String,
}

impl Scene {
    pub fn new(id: u8, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Scenes stored on the lamp, in the order the lamp reported them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneCatalog {
    scenes: Vec<Scene>,
}

impl SceneCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed list used when the scene names cannot be read from the lamp
    pub fn placeholder(count: u8) -> Self {
        let mut catalog = Self::new();
        catalog.push(Scene::new(SCENE_OFF, "Off"));
        catalog.push(Scene::new(SCENE_LAST, "Last scene"));
        for id in 1..=count.min(SCENE_LAST - 1) {
            catalog.push(Scene::new(id, format!("id: {id}")));
        }
        catalog
    }

    pub fn push(&mut self, scene: Scene) {
        self.scenes.push(scene);
    }

    pub fn contains(&self, id: u8) -> bool {
        self.scenes.iter().any(|scene| scene.id == id)
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Case-insensitive substring match on the scene name
    pub fn search(&self, query: &str) -> Vec<Scene> {
        let query = query.to_lowercase();
        self.scenes
            .iter()
            .filter(|scene| scene.name.to_lowercase().contains(&query))
            .cloned()
            .collect()
    }
}
