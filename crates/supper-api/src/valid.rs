//! The curated taxonomies. Anyone signed in may read them; only service
//! admins change them.

use axum::{extract::State, response::Response};
use serde::Serialize;
use supper_db::valid::{SEARCH_LIMIT, Searchable};
use supper_db::{DataManager, Database, Record, Scope, SearchableDataManager};
use supper_types::models::*;
use supper_types::{SessionContext, ids, time};

use crate::AppState;
use crate::envelope::{self, Details, TraceId};
use crate::error::{ApiError, ApiResult};
use crate::params::{self, Filter, PathParams, RouteBinder, RouteParam, SearchQuery};
use crate::service::{ResourceService, admin_writes, bind_crud, run_db};
use crate::session::Session;

pub fn bind<R: RouteBinder>(router: R, state: &AppState) -> R {
    let router = bind_crud(
        router,
        "/valid_ingredients",
        params::VALID_INGREDIENT_ID,
        ResourceService::new("valid_ingredient", state, params::VALID_INGREDIENT_ID, prepare_ingredient)
            .authorize(admin_writes),
    );
    let router = bind_crud(
        router,
        "/valid_preparations",
        params::VALID_PREPARATION_ID,
        ResourceService::new("valid_preparation", state, params::VALID_PREPARATION_ID, prepare_preparation)
            .authorize(admin_writes),
    );
    let router = bind_crud(
        router,
        "/valid_instruments",
        params::VALID_INSTRUMENT_ID,
        ResourceService::new("valid_instrument", state, params::VALID_INSTRUMENT_ID, prepare_instrument)
            .authorize(admin_writes),
    );
    let router = bind_crud(
        router,
        "/valid_measurement_units",
        params::VALID_MEASUREMENT_UNIT_ID,
        ResourceService::new("valid_measurement_unit", state, params::VALID_MEASUREMENT_UNIT_ID, prepare_unit)
            .authorize(admin_writes),
    );
    let router = bind_crud(
        router,
        "/valid_ingredient_preparations",
        params::VALID_INGREDIENT_PREPARATION_ID,
        ResourceService::new(
            "valid_ingredient_preparation",
            state,
            params::VALID_INGREDIENT_PREPARATION_ID,
            prepare_ingredient_preparation,
        )
        .authorize(admin_writes),
    );
    let router = bind_crud(
        router,
        "/valid_preparation_instruments",
        params::VALID_PREPARATION_INSTRUMENT_ID,
        ResourceService::new(
            "valid_preparation_instrument",
            state,
            params::VALID_PREPARATION_INSTRUMENT_ID,
            prepare_preparation_instrument,
        )
        .authorize(admin_writes),
    );
    let router = bind_crud(
        router,
        "/valid_ingredient_measurement_units",
        params::VALID_INGREDIENT_MEASUREMENT_UNIT_ID,
        ResourceService::new(
            "valid_ingredient_measurement_unit",
            state,
            params::VALID_INGREDIENT_MEASUREMENT_UNIT_ID,
            prepare_ingredient_measurement_unit,
        )
        .authorize(admin_writes),
    );

    let router = router
        .get("/valid_ingredients/search", search::<ValidIngredient>)
        .get("/valid_preparations/search", search::<ValidPreparation>)
        .get("/valid_instruments/search", search::<ValidInstrument>)
        .get("/valid_measurement_units/search", search::<ValidMeasurementUnit>);

    let router = bind_listing::<_, ValidIngredientPreparation>(
        router,
        "/valid_ingredient_preparations/by_ingredient",
        params::VALID_INGREDIENT_ID,
        "valid_ingredient_id",
    );
    let router = bind_listing::<_, ValidIngredientPreparation>(
        router,
        "/valid_ingredient_preparations/by_preparation",
        params::VALID_PREPARATION_ID,
        "valid_preparation_id",
    );
    let router = bind_listing::<_, ValidPreparationInstrument>(
        router,
        "/valid_preparation_instruments/by_preparation",
        params::VALID_PREPARATION_ID,
        "valid_preparation_id",
    );
    let router = bind_listing::<_, ValidPreparationInstrument>(
        router,
        "/valid_preparation_instruments/by_instrument",
        params::VALID_INSTRUMENT_ID,
        "valid_instrument_id",
    );
    let router = bind_listing::<_, ValidIngredientMeasurementUnit>(
        router,
        "/valid_ingredient_measurement_units/by_ingredient",
        params::VALID_INGREDIENT_ID,
        "valid_ingredient_id",
    );
    bind_listing::<_, ValidIngredientMeasurementUnit>(
        router,
        "/valid_ingredient_measurement_units/by_measurement_unit",
        params::VALID_MEASUREMENT_UNIT_ID,
        "valid_measurement_unit_id",
    )
}

fn prepare_ingredient(_: &Database, input: ValidIngredientCreationInput, _: &SessionContext, _: &[String]) -> ApiResult<ValidIngredient> {
    Ok(input.into_entity(ids::new_id(), time::now()))
}

fn prepare_preparation(_: &Database, input: ValidPreparationCreationInput, _: &SessionContext, _: &[String]) -> ApiResult<ValidPreparation> {
    Ok(input.into_entity(ids::new_id(), time::now()))
}

fn prepare_instrument(_: &Database, input: ValidInstrumentCreationInput, _: &SessionContext, _: &[String]) -> ApiResult<ValidInstrument> {
    Ok(input.into_entity(ids::new_id(), time::now()))
}

fn prepare_unit(
    _: &Database,
    input: ValidMeasurementUnitCreationInput,
    _: &SessionContext,
    _: &[String],
) -> ApiResult<ValidMeasurementUnit> {
    Ok(input.into_entity(ids::new_id(), time::now()))
}

/// Join rows must point at live taxonomy entries.
fn referenced<T: Record>(db: &Database, field: &str, id: &str) -> ApiResult<()> {
    if DataManager::<T>::exists(db, id, &Scope::all())? {
        Ok(())
    } else {
        Err(ApiError::invalid(field, "does not exist"))
    }
}

fn prepare_ingredient_preparation(
    db: &Database,
    input: ValidIngredientPreparationCreationInput,
    _: &SessionContext,
    _: &[String],
) -> ApiResult<ValidIngredientPreparation> {
    referenced::<ValidIngredient>(db, "validIngredientID", &input.valid_ingredient_id)?;
    referenced::<ValidPreparation>(db, "validPreparationID", &input.valid_preparation_id)?;
    Ok(input.into_entity(ids::new_id(), time::now()))
}

fn prepare_preparation_instrument(
    db: &Database,
    input: ValidPreparationInstrumentCreationInput,
    _: &SessionContext,
    _: &[String],
) -> ApiResult<ValidPreparationInstrument> {
    referenced::<ValidPreparation>(db, "validPreparationID", &input.valid_preparation_id)?;
    referenced::<ValidInstrument>(db, "validInstrumentID", &input.valid_instrument_id)?;
    Ok(input.into_entity(ids::new_id(), time::now()))
}

fn prepare_ingredient_measurement_unit(
    db: &Database,
    input: ValidIngredientMeasurementUnitCreationInput,
    _: &SessionContext,
    _: &[String],
) -> ApiResult<ValidIngredientMeasurementUnit> {
    referenced::<ValidIngredient>(db, "validIngredientID", &input.valid_ingredient_id)?;
    referenced::<ValidMeasurementUnit>(db, "validMeasurementUnitID", &input.valid_measurement_unit_id)?;
    Ok(input.into_entity(ids::new_id(), time::now()))
}

pub async fn search<T>(State(state): State<AppState>, session: Session, trace: TraceId, query: SearchQuery) -> ApiResult<Response>
where
    T: Searchable + Serialize,
{
    let results = run_db(&state.db, move |db| {
        Ok(SearchableDataManager::<T>::search(db, query.q.trim(), SEARCH_LIMIT)?)
    })
    .await?;
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), results))
}

/// Lists join rows whose `column` matches the path parameter.
fn bind_listing<R, T>(router: R, path: &str, param: RouteParam, column: &'static str) -> R
where
    R: RouteBinder,
    T: Record + Serialize,
{
    router.get(
        &format!("{}/{}", path, param.placeholder()),
        move |State(state): State<AppState>, session: Session, params: PathParams, trace: TraceId, filter: Filter| async move {
            let scope = Scope::all().eq(column, param.fetch(&params)?);
            let page = run_db(&state.db, move |db| Ok(DataManager::<T>::list(db, &scope, &filter.0)?)).await?;
            Ok::<_, ApiError>(envelope::with_page(Details::new(&trace, Some(&session.context)), page))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db"), &Default::default()).unwrap();
        (dir, db)
    }

    #[test]
    fn join_rows_need_live_endpoints() {
        let (_dir, db) = open_db();
        let ingredient = ValidIngredient { id: ids::new_id(), name: "onion".into(), created_at: time::now(), ..Default::default() };
        db.create(&ingredient).unwrap();

        let err = referenced::<ValidPreparation>(&db, "validPreparationID", "missing").unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT.validPreparationID");
        assert!(referenced::<ValidIngredient>(&db, "validIngredientID", &ingredient.id).is_ok());
    }
}
