//! In-memory plant directory standing in for the relational plant table
//! spec §1 puts out of scope. Grounded in the teacher's `zone_configs`/
//! `sensor_map` lookup tables built once at startup in `main.rs` from rows
//! loaded via `db.rs` — here a fixed in-process map takes the place of
//! those database-backed lookups.

use std::collections::HashMap;
use std::sync::Mutex;

use sysgrow_core::irrigation::{PlantContext, PlantContextResolver};

struct PlantRow {
    context: PlantContext,
    sensor_id: String,
}

/// A fixed set of plants registered at startup, with a sensor→plant index
/// for [`PlantContextResolver::resolve_by_sensor`].
pub struct DemoPlantDirectory {
    plants: Mutex<HashMap<u64, PlantRow>>,
}

impl DemoPlantDirectory {
    pub fn new() -> Self {
        Self { plants: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, sensor_id: impl Into<String>, context: PlantContext) {
        let mut plants = self.plants.lock().expect("plant directory poisoned");
        plants.insert(context.plant_id, PlantRow { context, sensor_id: sensor_id.into() });
    }
}

impl Default for DemoPlantDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PlantContextResolver for DemoPlantDirectory {
    fn resolve_by_sensor(&self, unit_id: u64, sensor_id: &str) -> Option<PlantContext> {
        let plants = self.plants.lock().expect("plant directory poisoned");
        plants
            .values()
            .find(|row| row.context.unit_id == unit_id && row.sensor_id == sensor_id)
            .map(|row| row.context.clone())
    }

    fn resolve_by_plant_id(&self, plant_id: u64) -> Option<PlantContext> {
        let plants = self.plants.lock().expect("plant directory poisoned");
        plants.get(&plant_id).map(|row| row.context.clone())
    }

    fn update_soil_moisture_threshold(&self, plant_id: u64, unit_id: u64, new_threshold: f64) -> bool {
        let mut plants = self.plants.lock().expect("plant directory poisoned");
        match plants.get_mut(&plant_id) {
            Some(row) if row.context.unit_id == unit_id => {
                row.context.target_moisture = new_threshold;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_context(plant_id: u64, unit_id: u64) -> PlantContext {
        PlantContext {
            plant_id,
            unit_id,
            user_id: 1,
            plant_type: "tomato".into(),
            growth_stage: "vegetative".into(),
            variety: None,
            strain_variety: None,
            pot_size_l: Some(10.0),
            assigned_pump: None,
            assigned_valve: Some("valve-1".into()),
            target_moisture: 45.0,
        }
    }

    #[test]
    fn registered_plant_resolves_by_sensor_and_id() {
        let directory = DemoPlantDirectory::new();
        directory.register("soil-1", demo_context(1, 1));

        assert!(directory.resolve_by_sensor(1, "soil-1").is_some());
        assert!(directory.resolve_by_sensor(1, "soil-2").is_none());
        assert!(directory.resolve_by_plant_id(1).is_some());
    }

    #[test]
    fn threshold_update_is_visible_on_next_resolve() {
        let directory = DemoPlantDirectory::new();
        directory.register("soil-1", demo_context(1, 1));

        assert!(directory.update_soil_moisture_threshold(1, 1, 50.0));
        let ctx = directory.resolve_by_plant_id(1).unwrap();
        assert_eq!(ctx.target_moisture, 50.0);
    }

    #[test]
    fn updating_an_unknown_plant_returns_false() {
        let directory = DemoPlantDirectory::new();
        assert!(!directory.update_soil_moisture_threshold(99, 1, 50.0));
    }
}
