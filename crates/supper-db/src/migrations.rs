use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (accounts and households)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                              TEXT PRIMARY KEY,
                username                        TEXT NOT NULL UNIQUE,
                email_address                   TEXT,
                avatar_src                      TEXT,
                hashed_password                 TEXT NOT NULL,
                two_factor_secret               TEXT NOT NULL,
                two_factor_secret_verified_at   INTEGER,
                service_roles                   TEXT NOT NULL DEFAULT 'service_user',
                account_status                  TEXT NOT NULL DEFAULT 'unverified',
                account_status_explanation      TEXT NOT NULL DEFAULT '',
                created_at                      INTEGER NOT NULL,
                last_updated_at                 INTEGER,
                archived_at                     INTEGER
            );

            CREATE TABLE households (
                id                  TEXT PRIMARY KEY,
                name                TEXT NOT NULL,
                contact_phone       TEXT,
                belongs_to_user     TEXT NOT NULL REFERENCES users(id),
                created_at          INTEGER NOT NULL,
                last_updated_at     INTEGER,
                archived_at         INTEGER
            );

            CREATE TABLE household_user_memberships (
                id                      TEXT PRIMARY KEY,
                belongs_to_household    TEXT NOT NULL REFERENCES households(id),
                belongs_to_user         TEXT NOT NULL REFERENCES users(id),
                household_role          TEXT NOT NULL DEFAULT 'member',
                default_household       INTEGER NOT NULL DEFAULT 0,
                created_at              INTEGER NOT NULL,
                last_updated_at         INTEGER,
                archived_at             INTEGER
            );

            CREATE UNIQUE INDEX idx_memberships_pair
                ON household_user_memberships(belongs_to_household, belongs_to_user)
                WHERE archived_at IS NULL;
            CREATE INDEX idx_memberships_user ON household_user_memberships(belongs_to_user);

            CREATE TABLE household_invitations (
                id                      TEXT PRIMARY KEY,
                from_user               TEXT NOT NULL REFERENCES users(id),
                to_user                 TEXT REFERENCES users(id),
                to_email                TEXT NOT NULL,
                to_name                 TEXT NOT NULL DEFAULT '',
                destination_household   TEXT NOT NULL REFERENCES households(id),
                status                  TEXT NOT NULL DEFAULT 'pending',
                note                    TEXT NOT NULL DEFAULT '',
                status_note             TEXT NOT NULL DEFAULT '',
                token                   TEXT NOT NULL UNIQUE,
                expires_at              INTEGER NOT NULL,
                created_at              INTEGER NOT NULL,
                last_updated_at         INTEGER,
                archived_at             INTEGER
            );

            CREATE TABLE sessions (
                token_hash      TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id),
                household_id    TEXT NOT NULL,
                expires_at      INTEGER NOT NULL,
                created_at      INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (valid taxonomies and recipes)");
        conn.execute_batch(
            "
            CREATE TABLE valid_ingredients (
                id                              TEXT PRIMARY KEY,
                name                            TEXT NOT NULL,
                plural_name                     TEXT NOT NULL DEFAULT '',
                description                     TEXT NOT NULL DEFAULT '',
                warning                         TEXT NOT NULL DEFAULT '',
                icon_path                       TEXT NOT NULL DEFAULT '',
                storage_instructions            TEXT NOT NULL DEFAULT '',
                contains_dairy                  INTEGER NOT NULL DEFAULT 0,
                contains_peanut                 INTEGER NOT NULL DEFAULT 0,
                contains_tree_nut               INTEGER NOT NULL DEFAULT 0,
                contains_egg                    INTEGER NOT NULL DEFAULT 0,
                contains_wheat                  INTEGER NOT NULL DEFAULT 0,
                contains_shellfish              INTEGER NOT NULL DEFAULT 0,
                contains_sesame                 INTEGER NOT NULL DEFAULT 0,
                contains_fish                   INTEGER NOT NULL DEFAULT 0,
                contains_gluten                 INTEGER NOT NULL DEFAULT 0,
                contains_soy                    INTEGER NOT NULL DEFAULT 0,
                contains_alcohol                INTEGER NOT NULL DEFAULT 0,
                animal_flesh                    INTEGER NOT NULL DEFAULT 0,
                animal_derived                  INTEGER NOT NULL DEFAULT 0,
                is_liquid                       INTEGER NOT NULL DEFAULT 0,
                volumetric                      INTEGER NOT NULL DEFAULT 0,
                restrict_to_preparations        INTEGER NOT NULL DEFAULT 0,
                minimum_ideal_storage_temperature_in_celsius REAL,
                maximum_ideal_storage_temperature_in_celsius REAL,
                created_at                      INTEGER NOT NULL,
                last_updated_at                 INTEGER,
                archived_at                     INTEGER
            );
            CREATE INDEX idx_valid_ingredients_name ON valid_ingredients(name);

            CREATE TABLE valid_preparations (
                id                      TEXT PRIMARY KEY,
                name                    TEXT NOT NULL,
                past_tense              TEXT NOT NULL DEFAULT '',
                description             TEXT NOT NULL DEFAULT '',
                icon_path               TEXT NOT NULL DEFAULT '',
                yields_nothing          INTEGER NOT NULL DEFAULT 0,
                restrict_to_ingredients INTEGER NOT NULL DEFAULT 0,
                yields_storable_output  INTEGER NOT NULL DEFAULT 0,
                created_at              INTEGER NOT NULL,
                last_updated_at         INTEGER,
                archived_at             INTEGER
            );
            CREATE INDEX idx_valid_preparations_name ON valid_preparations(name);

            CREATE TABLE valid_instruments (
                id                          TEXT PRIMARY KEY,
                name                        TEXT NOT NULL,
                plural_name                 TEXT NOT NULL DEFAULT '',
                description                 TEXT NOT NULL DEFAULT '',
                icon_path                   TEXT NOT NULL DEFAULT '',
                usable_for_storage          INTEGER NOT NULL DEFAULT 0,
                display_in_summary_lists    INTEGER NOT NULL DEFAULT 1,
                created_at                  INTEGER NOT NULL,
                last_updated_at             INTEGER,
                archived_at                 INTEGER
            );
            CREATE INDEX idx_valid_instruments_name ON valid_instruments(name);

            CREATE TABLE valid_measurement_units (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                plural_name     TEXT NOT NULL DEFAULT '',
                description     TEXT NOT NULL DEFAULT '',
                icon_path       TEXT NOT NULL DEFAULT '',
                volumetric      INTEGER NOT NULL DEFAULT 0,
                universal       INTEGER NOT NULL DEFAULT 0,
                metric          INTEGER NOT NULL DEFAULT 0,
                imperial        INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL,
                last_updated_at INTEGER,
                archived_at     INTEGER
            );
            CREATE INDEX idx_valid_measurement_units_name ON valid_measurement_units(name);

            CREATE TABLE valid_ingredient_preparations (
                id                      TEXT PRIMARY KEY,
                notes                   TEXT NOT NULL DEFAULT '',
                valid_ingredient_id     TEXT NOT NULL REFERENCES valid_ingredients(id),
                valid_preparation_id    TEXT NOT NULL REFERENCES valid_preparations(id),
                created_at              INTEGER NOT NULL,
                last_updated_at         INTEGER,
                archived_at             INTEGER
            );
            CREATE UNIQUE INDEX idx_vip_pair ON valid_ingredient_preparations(valid_ingredient_id, valid_preparation_id)
                WHERE archived_at IS NULL;

            CREATE TABLE valid_preparation_instruments (
                id                      TEXT PRIMARY KEY,
                notes                   TEXT NOT NULL DEFAULT '',
                valid_preparation_id    TEXT NOT NULL REFERENCES valid_preparations(id),
                valid_instrument_id     TEXT NOT NULL REFERENCES valid_instruments(id),
                created_at              INTEGER NOT NULL,
                last_updated_at         INTEGER,
                archived_at             INTEGER
            );
            CREATE UNIQUE INDEX idx_vpi_pair ON valid_preparation_instruments(valid_preparation_id, valid_instrument_id)
                WHERE archived_at IS NULL;

            CREATE TABLE valid_ingredient_measurement_units (
                id                          TEXT PRIMARY KEY,
                notes                       TEXT NOT NULL DEFAULT '',
                valid_ingredient_id         TEXT NOT NULL REFERENCES valid_ingredients(id),
                valid_measurement_unit_id   TEXT NOT NULL REFERENCES valid_measurement_units(id),
                minimum_allowable_quantity  REAL NOT NULL DEFAULT 0,
                maximum_allowable_quantity  REAL,
                created_at                  INTEGER NOT NULL,
                last_updated_at             INTEGER,
                archived_at                 INTEGER
            );
            CREATE UNIQUE INDEX idx_vimu_pair
                ON valid_ingredient_measurement_units(valid_ingredient_id, valid_measurement_unit_id)
                WHERE archived_at IS NULL;

            CREATE TABLE recipes (
                id                      TEXT PRIMARY KEY,
                name                    TEXT NOT NULL,
                source                  TEXT NOT NULL DEFAULT '',
                description             TEXT NOT NULL DEFAULT '',
                inspired_by_recipe_id   TEXT REFERENCES recipes(id),
                yields_portions         INTEGER NOT NULL DEFAULT 1,
                created_by_user         TEXT NOT NULL REFERENCES users(id),
                created_at              INTEGER NOT NULL,
                last_updated_at         INTEGER,
                archived_at             INTEGER
            );

            CREATE TABLE recipe_steps (
                id                                  TEXT PRIMARY KEY,
                step_index                          INTEGER NOT NULL,
                preparation_id                      TEXT NOT NULL REFERENCES valid_preparations(id),
                prerequisite_step_id                TEXT,
                minimum_estimated_time_in_seconds   INTEGER,
                maximum_estimated_time_in_seconds   INTEGER,
                maximum_prep_horizon_in_seconds     INTEGER,
                minimum_cooking_buffer_in_seconds   INTEGER,
                notes                               TEXT NOT NULL DEFAULT '',
                optional                            INTEGER NOT NULL DEFAULT 0,
                belongs_to_recipe                   TEXT NOT NULL REFERENCES recipes(id),
                created_at                          INTEGER NOT NULL,
                last_updated_at                     INTEGER,
                archived_at                         INTEGER
            );
            CREATE INDEX idx_recipe_steps_recipe ON recipe_steps(belongs_to_recipe, step_index);

            CREATE TABLE recipe_step_products (
                id                                  TEXT PRIMARY KEY,
                name                                TEXT NOT NULL,
                kind                                TEXT NOT NULL DEFAULT 'ingredient',
                measurement_unit_id                 TEXT REFERENCES valid_measurement_units(id),
                quantity_notes                      TEXT NOT NULL DEFAULT '',
                minimum_quantity                    REAL,
                maximum_quantity                    REAL,
                compostable                         INTEGER NOT NULL DEFAULT 0,
                maximum_storage_duration_in_seconds INTEGER,
                storage_instructions                TEXT NOT NULL DEFAULT '',
                belongs_to_recipe_step              TEXT NOT NULL REFERENCES recipe_steps(id),
                created_at                          INTEGER NOT NULL,
                last_updated_at                     INTEGER,
                archived_at                         INTEGER
            );

            CREATE TABLE recipe_step_ingredients (
                id                      TEXT PRIMARY KEY,
                name                    TEXT NOT NULL DEFAULT '',
                ingredient_id           TEXT REFERENCES valid_ingredients(id),
                recipe_step_product_id  TEXT REFERENCES recipe_step_products(id),
                measurement_unit_id     TEXT NOT NULL REFERENCES valid_measurement_units(id),
                minimum_quantity        REAL NOT NULL,
                maximum_quantity        REAL,
                quantity_notes          TEXT NOT NULL DEFAULT '',
                ingredient_notes        TEXT NOT NULL DEFAULT '',
                optional                INTEGER NOT NULL DEFAULT 0,
                belongs_to_recipe_step  TEXT NOT NULL REFERENCES recipe_steps(id),
                created_at              INTEGER NOT NULL,
                last_updated_at         INTEGER,
                archived_at             INTEGER,
                CHECK ((ingredient_id IS NULL) <> (recipe_step_product_id IS NULL))
            );

            CREATE TABLE recipe_step_instruments (
                id                      TEXT PRIMARY KEY,
                name                    TEXT NOT NULL DEFAULT '',
                instrument_id           TEXT REFERENCES valid_instruments(id),
                recipe_step_product_id  TEXT REFERENCES recipe_step_products(id),
                notes                   TEXT NOT NULL DEFAULT '',
                preference_rank         INTEGER NOT NULL DEFAULT 0,
                optional                INTEGER NOT NULL DEFAULT 0,
                minimum_quantity        INTEGER NOT NULL DEFAULT 1,
                maximum_quantity        INTEGER,
                belongs_to_recipe_step  TEXT NOT NULL REFERENCES recipe_steps(id),
                created_at              INTEGER NOT NULL,
                last_updated_at         INTEGER,
                archived_at             INTEGER
            );

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    if version < 3 {
        info!("Running migration v3 (meals and meal plans)");
        conn.execute_batch(
            "
            CREATE TABLE meals (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                description     TEXT NOT NULL DEFAULT '',
                created_by_user TEXT NOT NULL REFERENCES users(id),
                created_at      INTEGER NOT NULL,
                last_updated_at INTEGER,
                archived_at     INTEGER
            );

            CREATE TABLE meal_recipes (
                meal_id     TEXT NOT NULL REFERENCES meals(id),
                recipe_id   TEXT NOT NULL REFERENCES recipes(id),
                position    INTEGER NOT NULL,
                PRIMARY KEY (meal_id, recipe_id)
            );

            CREATE TABLE meal_plans (
                id                      TEXT PRIMARY KEY,
                notes                   TEXT NOT NULL DEFAULT '',
                status                  TEXT NOT NULL DEFAULT 'awaiting_votes',
                voting_deadline         INTEGER NOT NULL,
                belongs_to_household    TEXT NOT NULL REFERENCES households(id),
                votes_updated_at        INTEGER,
                finalization_checked_at INTEGER,
                prep_steps_derived_at   INTEGER,
                created_at              INTEGER NOT NULL,
                last_updated_at         INTEGER,
                archived_at             INTEGER
            );
            CREATE INDEX idx_meal_plans_household ON meal_plans(belongs_to_household);
            CREATE INDEX idx_meal_plans_status ON meal_plans(status, voting_deadline);

            CREATE TABLE meal_plan_shares (
                meal_plan_id    TEXT NOT NULL REFERENCES meal_plans(id),
                household_id    TEXT NOT NULL REFERENCES households(id),
                PRIMARY KEY (meal_plan_id, household_id)
            );
            CREATE INDEX idx_meal_plan_shares_household ON meal_plan_shares(household_id);

            CREATE TABLE meal_plan_events (
                id                      TEXT PRIMARY KEY,
                notes                   TEXT NOT NULL DEFAULT '',
                meal_name               TEXT NOT NULL,
                starts_at               INTEGER NOT NULL,
                ends_at                 INTEGER NOT NULL,
                belongs_to_meal_plan    TEXT NOT NULL REFERENCES meal_plans(id),
                created_at              INTEGER NOT NULL,
                last_updated_at         INTEGER,
                archived_at             INTEGER
            );

            CREATE TABLE meal_plan_options (
                id                          TEXT PRIMARY KEY,
                meal_id                     TEXT NOT NULL REFERENCES meals(id),
                notes                       TEXT NOT NULL DEFAULT '',
                assigned_cook               TEXT REFERENCES users(id),
                chosen                      INTEGER NOT NULL DEFAULT 0,
                tiebroken                   INTEGER NOT NULL DEFAULT 0,
                belongs_to_meal_plan_event  TEXT NOT NULL REFERENCES meal_plan_events(id),
                created_at                  INTEGER NOT NULL,
                last_updated_at             INTEGER,
                archived_at                 INTEGER
            );

            CREATE TABLE meal_plan_option_votes (
                id                          TEXT PRIMARY KEY,
                rank                        INTEGER NOT NULL,
                abstain                     INTEGER NOT NULL DEFAULT 0,
                notes                       TEXT NOT NULL DEFAULT '',
                by_user                     TEXT NOT NULL REFERENCES users(id),
                by_household                TEXT NOT NULL REFERENCES households(id),
                belongs_to_meal_plan_option TEXT NOT NULL REFERENCES meal_plan_options(id),
                created_at                  INTEGER NOT NULL,
                last_updated_at             INTEGER,
                archived_at                 INTEGER
            );
            CREATE INDEX idx_votes_option ON meal_plan_option_votes(belongs_to_meal_plan_option, by_household);

            CREATE TABLE advanced_prep_steps (
                id                      TEXT PRIMARY KEY,
                meal_plan_option        TEXT NOT NULL REFERENCES meal_plan_options(id),
                recipe_step             TEXT NOT NULL REFERENCES recipe_steps(id),
                belongs_to_meal_plan    TEXT NOT NULL REFERENCES meal_plans(id),
                cannot_complete_before  INTEGER NOT NULL,
                cannot_complete_after   INTEGER NOT NULL,
                completed_at            INTEGER,
                notes                   TEXT NOT NULL DEFAULT '',
                created_at              INTEGER NOT NULL,
                last_updated_at         INTEGER,
                archived_at             INTEGER,
                UNIQUE (belongs_to_meal_plan, recipe_step, meal_plan_option)
            );

            CREATE TABLE meal_plan_locks (
                meal_plan_id    TEXT PRIMARY KEY,
                holder          TEXT NOT NULL,
                expires_at      INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (3);
            ",
        )?;
    }

    if version < 4 {
        info!("Running migration v4 (webhooks)");
        conn.execute_batch(
            "
            CREATE TABLE webhooks (
                id                      TEXT PRIMARY KEY,
                name                    TEXT NOT NULL,
                content_type            TEXT NOT NULL DEFAULT 'application/json',
                url                     TEXT NOT NULL,
                method                  TEXT NOT NULL DEFAULT 'POST',
                events                  TEXT NOT NULL DEFAULT '[]',
                data_types              TEXT NOT NULL DEFAULT '[]',
                topics                  TEXT NOT NULL DEFAULT '[]',
                belongs_to_household    TEXT NOT NULL REFERENCES households(id),
                created_at              INTEGER NOT NULL,
                last_updated_at         INTEGER,
                archived_at             INTEGER
            );
            CREATE UNIQUE INDEX idx_webhooks_url ON webhooks(belongs_to_household, url) WHERE archived_at IS NULL;

            CREATE TABLE webhook_delivery_failures (
                id          TEXT PRIMARY KEY,
                webhook_id  TEXT NOT NULL REFERENCES webhooks(id),
                message_id  TEXT NOT NULL,
                attempts    INTEGER NOT NULL,
                last_error  TEXT NOT NULL,
                failed_at   INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (4);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        let version: i64 = conn.query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, 4);
    }
}
