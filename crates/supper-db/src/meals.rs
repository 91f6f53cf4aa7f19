use rusqlite::types::Value;
use rusqlite::{Connection, Row, params};
use supper_types::models::Meal;

use crate::error::DbResult;
use crate::record::{self, Record, read_ms, read_opt_ms, text};

impl Record for Meal {
    const TABLE: &'static str = "meals";
    const COLUMNS: &'static [&'static str] = &["name", "description", "created_by_user"];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Meal {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            created_by_user: row.get("created_by_user")?,
            recipes: Vec::new(),
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.name),
            text(&self.description),
            text(&self.created_by_user),
        ]
    }

    fn load_children(&mut self, conn: &Connection) -> DbResult<()> {
        let mut stmt = conn.prepare("SELECT recipe_id FROM meal_recipes WHERE meal_id = ?1 ORDER BY position")?;
        self.recipes = stmt
            .query_map(params![self.id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(())
    }

    fn insert_children(&self, conn: &Connection) -> DbResult<()> {
        let mut stmt = conn.prepare("INSERT INTO meal_recipes (meal_id, recipe_id, position) VALUES (?1, ?2, ?3)")?;
        for (position, recipe_id) in self.recipes.iter().enumerate() {
            stmt.execute(params![self.id, recipe_id, position as i64])?;
        }
        Ok(())
    }

    fn update_children(&self, conn: &Connection) -> DbResult<()> {
        conn.execute("DELETE FROM meal_recipes WHERE meal_id = ?1", params![self.id])?;
        self.insert_children(conn)
    }
}
