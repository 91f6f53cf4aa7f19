//! Path and query parameters, and the routing seam entity modules bind to.

use std::collections::HashMap;

use axum::{
    Router,
    extract::{FromRequestParts, Path, Query},
    handler::Handler,
    http::request::Parts,
    routing,
};
use supper_types::{QueryFilter, ids};

use crate::AppState;
use crate::error::ApiError;

/// Every path parameter of the matched route, keyed by name. Routes without
/// parameters yield an empty map.
#[derive(Debug, Clone, Default)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for PathParams {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let params = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map(|Path(map)| map)
            .unwrap_or_default();
        Ok(PathParams(params))
    }
}

impl FromIterator<(String, String)> for PathParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        PathParams(iter.into_iter().collect())
    }
}

/// Accessor for one path parameter, built once when routes are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteParam {
    key: &'static str,
}

impl RouteParam {
    pub const fn new(key: &'static str) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// `{key}`, for building route patterns.
    pub fn placeholder(&self) -> String {
        format!("{{{}}}", self.key)
    }

    pub fn fetch(&self, params: &PathParams) -> Result<String, ApiError> {
        let value = params
            .get(self.key)
            .ok_or_else(|| ApiError::invalid(self.key, "missing path parameter"))?;
        if !ids::is_well_formed(value) {
            return Err(ApiError::invalid(self.key, "malformed identifier"));
        }
        Ok(value.to_string())
    }
}

pub const USER_ID: RouteParam = RouteParam::new("userID");
pub const HOUSEHOLD_ID: RouteParam = RouteParam::new("householdID");
pub const HOUSEHOLD_INVITATION_ID: RouteParam = RouteParam::new("householdInvitationID");
pub const VALID_INGREDIENT_ID: RouteParam = RouteParam::new("validIngredientID");
pub const VALID_PREPARATION_ID: RouteParam = RouteParam::new("validPreparationID");
pub const VALID_INSTRUMENT_ID: RouteParam = RouteParam::new("validInstrumentID");
pub const VALID_MEASUREMENT_UNIT_ID: RouteParam = RouteParam::new("validMeasurementUnitID");
pub const VALID_INGREDIENT_PREPARATION_ID: RouteParam = RouteParam::new("validIngredientPreparationID");
pub const VALID_PREPARATION_INSTRUMENT_ID: RouteParam = RouteParam::new("validPreparationInstrumentID");
pub const VALID_INGREDIENT_MEASUREMENT_UNIT_ID: RouteParam = RouteParam::new("validIngredientMeasurementUnitID");
pub const RECIPE_ID: RouteParam = RouteParam::new("recipeID");
pub const RECIPE_STEP_ID: RouteParam = RouteParam::new("recipeStepID");
pub const RECIPE_STEP_INGREDIENT_ID: RouteParam = RouteParam::new("recipeStepIngredientID");
pub const RECIPE_STEP_INSTRUMENT_ID: RouteParam = RouteParam::new("recipeStepInstrumentID");
pub const RECIPE_STEP_PRODUCT_ID: RouteParam = RouteParam::new("recipeStepProductID");
pub const MEAL_ID: RouteParam = RouteParam::new("mealID");
pub const MEAL_PLAN_ID: RouteParam = RouteParam::new("mealPlanID");
pub const MEAL_PLAN_EVENT_ID: RouteParam = RouteParam::new("mealPlanEventID");
pub const MEAL_PLAN_OPTION_ID: RouteParam = RouteParam::new("mealPlanOptionID");
pub const MEAL_PLAN_OPTION_VOTE_ID: RouteParam = RouteParam::new("mealPlanOptionVoteID");
pub const ADVANCED_PREP_STEP_ID: RouteParam = RouteParam::new("advancedPrepStepID");
pub const WEBHOOK_ID: RouteParam = RouteParam::new("webhookID");

/// List query parameters. Bad values reject with `INVALID_INPUT` rather
/// than axum's plain-text rejection.
#[derive(Debug, Clone, Default)]
pub struct Filter(pub QueryFilter);

impl<S: Send + Sync> FromRequestParts<S> for Filter {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<QueryFilter>::from_request_parts(parts, state)
            .await
            .map(|Query(filter)| Filter(filter))
            .map_err(|rejection| ApiError::InvalidInput { field: None, message: rejection.body_text() })
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

impl<S: Send + Sync> FromRequestParts<S> for SearchQuery {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(query) = Query::<SearchQuery>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::InvalidInput { field: None, message: rejection.body_text() })?;
        if query.q.trim().is_empty() {
            return Err(ApiError::invalid("q", "must not be blank"));
        }
        Ok(query)
    }
}

/// The binding surface entity modules register their handlers through, so
/// they never depend on the concrete router.
pub trait RouteBinder: Sized {
    fn get<H, T>(self, pattern: &str, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static;

    fn post<H, T>(self, pattern: &str, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static;

    fn put<H, T>(self, pattern: &str, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static;

    fn patch<H, T>(self, pattern: &str, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static;

    fn delete<H, T>(self, pattern: &str, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static;
}

impl RouteBinder for Router<AppState> {
    fn get<H, T>(self, pattern: &str, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route(pattern, routing::get(handler))
    }

    fn post<H, T>(self, pattern: &str, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route(pattern, routing::post(handler))
    }

    fn put<H, T>(self, pattern: &str, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route(pattern, routing::put(handler))
    }

    fn patch<H, T>(self, pattern: &str, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route(pattern, routing::patch(handler))
    }

    fn delete<H, T>(self, pattern: &str, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        self.route(pattern, routing::delete(handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_checks_presence_and_shape() {
        let params: PathParams = [("mealPlanID".to_string(), "0190a1b2c3d4e5f6a7b8c9d0e1f2a3b4".to_string())]
            .into_iter()
            .collect();
        assert_eq!(MEAL_PLAN_ID.fetch(&params).unwrap(), "0190a1b2c3d4e5f6a7b8c9d0e1f2a3b4");

        let missing = MEAL_PLAN_EVENT_ID.fetch(&params).unwrap_err();
        assert_eq!(missing.code(), "INVALID_INPUT.mealPlanEventID");

        let bad: PathParams = [("mealPlanID".to_string(), "../../etc".to_string())].into_iter().collect();
        assert!(MEAL_PLAN_ID.fetch(&bad).is_err());
    }

    #[test]
    fn placeholders_use_the_canonical_key() {
        assert_eq!(RECIPE_STEP_ID.placeholder(), "{recipeStepID}");
    }
}
