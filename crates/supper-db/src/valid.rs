//! Storage for the curated taxonomies and their join entities.

use rusqlite::types::Value;
use rusqlite::{Row, params};
use supper_types::models::{
    ValidIngredient, ValidIngredientMeasurementUnit, ValidIngredientPreparation, ValidInstrument,
    ValidMeasurementUnit, ValidPreparation, ValidPreparationInstrument,
};

use crate::error::DbResult;
use crate::record::{self, Record, flag, opt_real, read_f32, read_ms, read_opt_f32, read_opt_ms, real, text};
use crate::Database;

pub const SEARCH_LIMIT: u32 = 50;

/// Records that can be looked up by a name fragment.
pub trait Searchable: Record {
    const SEARCH_COLUMN: &'static str = "name";
}

pub trait SearchableDataManager<T> {
    /// Live rows whose search column contains `query`, prefix matches first.
    fn search(&self, query: &str, limit: u32) -> DbResult<Vec<T>>;
}

impl<T: Searchable> SearchableDataManager<T> for Database {
    fn search(&self, query: &str, limit: u32) -> DbResult<Vec<T>> {
        let escaped = query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let col = T::SEARCH_COLUMN;
        let sql = format!(
            "SELECT {cols} FROM {table}
             WHERE archived_at IS NULL AND {col} LIKE ?1 ESCAPE '\\'
             ORDER BY {col} LIKE ?2 ESCAPE '\\' DESC, {col}, id
             LIMIT ?3",
            cols = record::select_list::<T>(),
            table = T::TABLE,
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![format!("%{}%", escaped), format!("{}%", escaped), limit.clamp(1, SEARCH_LIMIT)],
                    T::from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

impl Searchable for ValidIngredient {}
impl Searchable for ValidPreparation {}
impl Searchable for ValidInstrument {}
impl Searchable for ValidMeasurementUnit {}

impl Record for ValidIngredient {
    const TABLE: &'static str = "valid_ingredients";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "plural_name",
        "description",
        "warning",
        "icon_path",
        "storage_instructions",
        "contains_dairy",
        "contains_peanut",
        "contains_tree_nut",
        "contains_egg",
        "contains_wheat",
        "contains_shellfish",
        "contains_sesame",
        "contains_fish",
        "contains_gluten",
        "contains_soy",
        "contains_alcohol",
        "animal_flesh",
        "animal_derived",
        "is_liquid",
        "volumetric",
        "restrict_to_preparations",
        "minimum_ideal_storage_temperature_in_celsius",
        "maximum_ideal_storage_temperature_in_celsius",
    ];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ValidIngredient {
            id: row.get("id")?,
            name: row.get("name")?,
            plural_name: row.get("plural_name")?,
            description: row.get("description")?,
            warning: row.get("warning")?,
            icon_path: row.get("icon_path")?,
            storage_instructions: row.get("storage_instructions")?,
            contains_dairy: row.get("contains_dairy")?,
            contains_peanut: row.get("contains_peanut")?,
            contains_tree_nut: row.get("contains_tree_nut")?,
            contains_egg: row.get("contains_egg")?,
            contains_wheat: row.get("contains_wheat")?,
            contains_shellfish: row.get("contains_shellfish")?,
            contains_sesame: row.get("contains_sesame")?,
            contains_fish: row.get("contains_fish")?,
            contains_gluten: row.get("contains_gluten")?,
            contains_soy: row.get("contains_soy")?,
            contains_alcohol: row.get("contains_alcohol")?,
            animal_flesh: row.get("animal_flesh")?,
            animal_derived: row.get("animal_derived")?,
            is_liquid: row.get("is_liquid")?,
            volumetric: row.get("volumetric")?,
            restrict_to_preparations: row.get("restrict_to_preparations")?,
            minimum_ideal_storage_temperature_in_celsius: read_opt_f32(
                row,
                "minimum_ideal_storage_temperature_in_celsius",
            )?,
            maximum_ideal_storage_temperature_in_celsius: read_opt_f32(
                row,
                "maximum_ideal_storage_temperature_in_celsius",
            )?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.name),
            text(&self.plural_name),
            text(&self.description),
            text(&self.warning),
            text(&self.icon_path),
            text(&self.storage_instructions),
            flag(self.contains_dairy),
            flag(self.contains_peanut),
            flag(self.contains_tree_nut),
            flag(self.contains_egg),
            flag(self.contains_wheat),
            flag(self.contains_shellfish),
            flag(self.contains_sesame),
            flag(self.contains_fish),
            flag(self.contains_gluten),
            flag(self.contains_soy),
            flag(self.contains_alcohol),
            flag(self.animal_flesh),
            flag(self.animal_derived),
            flag(self.is_liquid),
            flag(self.volumetric),
            flag(self.restrict_to_preparations),
            opt_real(self.minimum_ideal_storage_temperature_in_celsius),
            opt_real(self.maximum_ideal_storage_temperature_in_celsius),
        ]
    }
}

impl Record for ValidPreparation {
    const TABLE: &'static str = "valid_preparations";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "past_tense",
        "description",
        "icon_path",
        "yields_nothing",
        "restrict_to_ingredients",
        "yields_storable_output",
    ];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ValidPreparation {
            id: row.get("id")?,
            name: row.get("name")?,
            past_tense: row.get("past_tense")?,
            description: row.get("description")?,
            icon_path: row.get("icon_path")?,
            yields_nothing: row.get("yields_nothing")?,
            restrict_to_ingredients: row.get("restrict_to_ingredients")?,
            yields_storable_output: row.get("yields_storable_output")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.name),
            text(&self.past_tense),
            text(&self.description),
            text(&self.icon_path),
            flag(self.yields_nothing),
            flag(self.restrict_to_ingredients),
            flag(self.yields_storable_output),
        ]
    }
}

impl Record for ValidInstrument {
    const TABLE: &'static str = "valid_instruments";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "plural_name",
        "description",
        "icon_path",
        "usable_for_storage",
        "display_in_summary_lists",
    ];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ValidInstrument {
            id: row.get("id")?,
            name: row.get("name")?,
            plural_name: row.get("plural_name")?,
            description: row.get("description")?,
            icon_path: row.get("icon_path")?,
            usable_for_storage: row.get("usable_for_storage")?,
            display_in_summary_lists: row.get("display_in_summary_lists")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.name),
            text(&self.plural_name),
            text(&self.description),
            text(&self.icon_path),
            flag(self.usable_for_storage),
            flag(self.display_in_summary_lists),
        ]
    }
}

impl Record for ValidMeasurementUnit {
    const TABLE: &'static str = "valid_measurement_units";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "plural_name",
        "description",
        "icon_path",
        "volumetric",
        "universal",
        "metric",
        "imperial",
    ];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ValidMeasurementUnit {
            id: row.get("id")?,
            name: row.get("name")?,
            plural_name: row.get("plural_name")?,
            description: row.get("description")?,
            icon_path: row.get("icon_path")?,
            volumetric: row.get("volumetric")?,
            universal: row.get("universal")?,
            metric: row.get("metric")?,
            imperial: row.get("imperial")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.name),
            text(&self.plural_name),
            text(&self.description),
            text(&self.icon_path),
            flag(self.volumetric),
            flag(self.universal),
            flag(self.metric),
            flag(self.imperial),
        ]
    }
}

impl Record for ValidIngredientPreparation {
    const TABLE: &'static str = "valid_ingredient_preparations";
    const COLUMNS: &'static [&'static str] = &["notes", "valid_ingredient_id", "valid_preparation_id"];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ValidIngredientPreparation {
            id: row.get("id")?,
            notes: row.get("notes")?,
            valid_ingredient_id: row.get("valid_ingredient_id")?,
            valid_preparation_id: row.get("valid_preparation_id")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.notes),
            text(&self.valid_ingredient_id),
            text(&self.valid_preparation_id),
        ]
    }
}

impl Record for ValidPreparationInstrument {
    const TABLE: &'static str = "valid_preparation_instruments";
    const COLUMNS: &'static [&'static str] = &["notes", "valid_preparation_id", "valid_instrument_id"];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ValidPreparationInstrument {
            id: row.get("id")?,
            notes: row.get("notes")?,
            valid_preparation_id: row.get("valid_preparation_id")?,
            valid_instrument_id: row.get("valid_instrument_id")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.notes),
            text(&self.valid_preparation_id),
            text(&self.valid_instrument_id),
        ]
    }
}

impl Record for ValidIngredientMeasurementUnit {
    const TABLE: &'static str = "valid_ingredient_measurement_units";
    const COLUMNS: &'static [&'static str] = &[
        "notes",
        "valid_ingredient_id",
        "valid_measurement_unit_id",
        "minimum_allowable_quantity",
        "maximum_allowable_quantity",
    ];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ValidIngredientMeasurementUnit {
            id: row.get("id")?,
            notes: row.get("notes")?,
            valid_ingredient_id: row.get("valid_ingredient_id")?,
            valid_measurement_unit_id: row.get("valid_measurement_unit_id")?,
            minimum_allowable_quantity: read_f32(row, "minimum_allowable_quantity")?,
            maximum_allowable_quantity: read_opt_f32(row, "maximum_allowable_quantity")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.notes),
            text(&self.valid_ingredient_id),
            text(&self.valid_measurement_unit_id),
            real(self.minimum_allowable_quantity),
            opt_real(self.maximum_allowable_quantity),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DataManager, Scope};
    use crate::testing::open_temp;
    use supper_types::filter::QueryFilter;
    use supper_types::{ids, time};

    fn ingredient(name: &str) -> ValidIngredient {
        ValidIngredient { id: ids::new_id(), name: name.into(), created_at: time::now(), ..Default::default() }
    }

    #[test]
    fn search_prefers_prefix_matches() {
        let (_dir, db) = open_temp();
        for name in ["red onion", "onion", "garlic", "100% cocoa"] {
            db.create(&ingredient(name)).unwrap();
        }
        let found: Vec<ValidIngredient> = db.search("onion", 10).unwrap();
        let names: Vec<_> = found.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["onion", "red onion"]);

        let literal: Vec<ValidIngredient> = db.search("100%", 10).unwrap();
        assert_eq!(literal.len(), 1);
    }

    #[test]
    fn list_paginates_and_hides_archived_rows() {
        let (_dir, db) = open_temp();
        let mut created = Vec::new();
        for i in 0..5 {
            let mut ing = ingredient(&format!("ingredient {}", i));
            ing.created_at = time::from_millis(1_000 + i).unwrap();
            created.push(ing.id.clone());
            db.create(&ing).unwrap();
        }
        DataManager::<ValidIngredient>::archive(&db, &created[0], &Scope::all()).unwrap();

        let filter = QueryFilter { page: Some(2), limit: Some(2), ..Default::default() };
        let page = DataManager::<ValidIngredient>::list(&db, &Scope::all(), &filter).unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.pagination.page, 2);
        assert_eq!(page.pagination.total_count, 4);
        assert_eq!(page.data[0].id, created[3]);

        let beyond = QueryFilter { page: Some(9), ..Default::default() };
        assert!(DataManager::<ValidIngredient>::list(&db, &Scope::all(), &beyond).unwrap().data.is_empty());
    }

    #[test]
    fn archive_twice_reports_not_found() {
        let (_dir, db) = open_temp();
        let ing = ingredient("salt");
        db.create(&ing).unwrap();
        DataManager::<ValidIngredient>::archive(&db, &ing.id, &Scope::all()).unwrap();
        let again = DataManager::<ValidIngredient>::archive(&db, &ing.id, &Scope::all());
        assert!(matches!(again, Err(crate::DbError::NotFound)));
    }

    #[test]
    fn update_round_trips_floats() {
        let (_dir, db) = open_temp();
        let mut ing = ingredient("butter");
        ing.minimum_ideal_storage_temperature_in_celsius = Some(2.5);
        db.create(&ing).unwrap();
        ing.name = "salted butter".into();
        db.update(&mut ing).unwrap();
        assert!(ing.last_updated_at.is_some());

        let stored: ValidIngredient = db.get(&ing.id, &Scope::all()).unwrap();
        assert_eq!(stored, ing);
    }
}
