//! The resource-service template: one implementation of the create, read,
//! list, update and archive pipeline, instantiated per entity with the
//! callbacks that differ (scope, authorization, preparation, checks).

use std::marker::PhantomData;
use std::sync::Arc;

use axum::{http::StatusCode, response::Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use supper_db::{DataManager, Database, Record, Scope};
use supper_events::{Publisher, PublisherProvider};
use supper_types::merge::Updatable;
use supper_types::{DataChange, DataChangeMessage, Entity, EventType, SessionContext, Validate, ValidationError};
use tracing::{Span, debug, instrument, warn};

use crate::AppState;
use crate::envelope::{self, Details, JsonBody, TraceId};
use crate::error::{ApiError, ApiResult};
use crate::params::{Filter, PathParams, RouteBinder, RouteParam};
use crate::session::Session;

/// Runs data-manager calls on the blocking pool. This is where a request
/// suspends for storage.
pub async fn run_db<F, T>(db: &Arc<Database>, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db)).await?
}

/// Long-lived publishers for the topics handlers write to.
#[derive(Clone)]
pub struct Publishers {
    pub data_changes: Arc<dyn Publisher>,
    pub finalization_requests: Arc<dyn Publisher>,
    pub finalized: Arc<dyn Publisher>,
}

impl Publishers {
    pub fn from_provider(provider: &dyn PublisherProvider) -> Self {
        Self {
            data_changes: provider.provide(supper_events::DATA_CHANGES),
            finalization_requests: provider.provide(supper_events::FINALIZATION_REQUESTS),
            finalized: provider.provide(supper_events::FINALIZED),
        }
    }
}

/// Publishes after a committed write. Failure is logged and swallowed: the
/// write stands, and the periodic scan reconciles derived state.
pub async fn publish(publisher: &dyn Publisher, message: DataChangeMessage) {
    let event_type = message.event_type;
    let data_type = message.data_type();
    match publisher.send(message).await {
        Ok(envelope) => debug!(topic = publisher.topic(), message_id = %envelope.id, %event_type, %data_type, "published"),
        Err(e) => warn!(topic = publisher.topic(), %event_type, %data_type, "publish failed: {}", e),
    }
}

/// Stamps a message with the acting user and household.
pub fn message_from(session: &SessionContext, event_type: EventType, change: DataChange) -> DataChangeMessage {
    DataChangeMessage::new(event_type, change)
        .by_user(session.user_id())
        .in_household(session.household_id())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    List,
    Update,
    Archive,
}

impl Operation {
    pub fn mutates(&self) -> bool {
        matches!(self, Operation::Create | Operation::Update | Operation::Archive)
    }
}

/// Builds the visibility scope from the session and the resolved parent IDs.
pub type ScopeFn = fn(&SessionContext, &[String], Operation) -> Scope;
/// Rejects operations the caller's roles do not allow. Gets the target ID
/// for item operations.
pub type AuthorizeFn = fn(&SessionContext, Operation, &[String], Option<&str>) -> ApiResult<()>;
/// Turns a validated creation input into the entity to store. Runs on the
/// blocking pool, so it may consult the database (e.g. parent ownership).
pub type PrepareFn<T, C> = fn(&Database, C, &SessionContext, &[String]) -> ApiResult<T>;
/// Entity-level invariants, checked after creation and after every merge.
pub type CheckFn<T> = fn(&T) -> Result<(), ValidationError>;

pub fn unscoped(_: &SessionContext, _: &[String], _: Operation) -> Scope {
    Scope::all()
}

pub fn allow_all(_: &SessionContext, _: Operation, _: &[String], _: Option<&str>) -> ApiResult<()> {
    Ok(())
}

/// Anyone signed in may read; only service admins may write.
pub fn admin_writes(session: &SessionContext, op: Operation, _: &[String], _: Option<&str>) -> ApiResult<()> {
    if op.mutates() && !session.is_service_admin() {
        return Err(ApiError::forbidden("service admin role required"));
    }
    Ok(())
}

pub fn no_check<T>(_: &T) -> Result<(), ValidationError> {
    Ok(())
}

pub struct ResourceService<T, C> {
    name: &'static str,
    db: Arc<Database>,
    publisher: Arc<dyn Publisher>,
    id: RouteParam,
    parents: Vec<RouteParam>,
    scope: ScopeFn,
    authorize: AuthorizeFn,
    prepare: PrepareFn<T, C>,
    check: CheckFn<T>,
    _marker: PhantomData<fn() -> (T, C)>,
}

impl<T, C> ResourceService<T, C>
where
    T: Record + Entity + Serialize + PartialEq + Sync,
    C: Validate + Send + 'static,
{
    pub fn new(name: &'static str, state: &AppState, id: RouteParam, prepare: PrepareFn<T, C>) -> Self {
        Self {
            name,
            db: Arc::clone(&state.db),
            publisher: Arc::clone(&state.publishers.data_changes),
            id,
            parents: Vec::new(),
            scope: unscoped,
            authorize: allow_all,
            prepare,
            check: no_check::<T>,
            _marker: PhantomData,
        }
    }

    /// Path parameters naming the parent entities, outermost first.
    pub fn parents(mut self, parents: &[RouteParam]) -> Self {
        self.parents = parents.to_vec();
        self
    }

    pub fn scope(mut self, scope: ScopeFn) -> Self {
        self.scope = scope;
        self
    }

    pub fn authorize(mut self, authorize: AuthorizeFn) -> Self {
        self.authorize = authorize;
        self
    }

    pub fn check(mut self, check: CheckFn<T>) -> Self {
        self.check = check;
        self
    }

    fn resolve_parents(&self, params: &PathParams) -> ApiResult<Vec<String>> {
        self.parents.iter().map(|p| p.fetch(params)).collect()
    }

    async fn announce(&self, session: &SessionContext, event_type: EventType, change: DataChange) {
        publish(self.publisher.as_ref(), message_from(session, event_type, change)).await;
    }

    #[instrument(skip_all, fields(entity = self.name, operation = "create", trace_id = %trace.0,
        user_id = %session.user_id(), household_id = %session.household_id(), id = tracing::field::Empty))]
    pub async fn create(&self, session: Session, params: PathParams, trace: TraceId, input: C) -> ApiResult<Response> {
        let parents = self.resolve_parents(&params)?;
        (self.authorize)(&session, Operation::Create, &parents, None)?;
        input.validate()?;

        let (prepare, check) = (self.prepare, self.check);
        let context = session.context.clone();
        let entity = run_db(&self.db, move |db| {
            let entity = prepare(db, input, &context, &parents)?;
            check(&entity)?;
            db.create(&entity)?;
            Ok(entity)
        })
        .await?;
        Span::current().record("id", Record::id(&entity));

        self.announce(&session, EventType::Created, entity.to_change()).await;
        Ok(envelope::with_status(StatusCode::CREATED, Details::new(&trace, Some(&session.context)), entity))
    }

    #[instrument(skip_all, fields(entity = self.name, operation = "read", trace_id = %trace.0,
        user_id = %session.user_id(), household_id = %session.household_id(), id = tracing::field::Empty))]
    pub async fn read(&self, session: Session, params: PathParams, trace: TraceId) -> ApiResult<Response> {
        let parents = self.resolve_parents(&params)?;
        let id = self.id.fetch(&params)?;
        Span::current().record("id", id.as_str());
        (self.authorize)(&session, Operation::Read, &parents, Some(&id))?;

        let scope = (self.scope)(&session, &parents, Operation::Read);
        let entity: T = run_db(&self.db, move |db| Ok(DataManager::<T>::get(db, &id, &scope)?)).await?;
        Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), entity))
    }

    #[instrument(skip_all, fields(entity = self.name, operation = "list", trace_id = %trace.0,
        user_id = %session.user_id(), household_id = %session.household_id()))]
    pub async fn list(&self, session: Session, params: PathParams, trace: TraceId, filter: Filter) -> ApiResult<Response> {
        let parents = self.resolve_parents(&params)?;
        (self.authorize)(&session, Operation::List, &parents, None)?;

        let mut filter = filter.0;
        filter.include_archived &= session.is_service_admin();
        let scope = (self.scope)(&session, &parents, Operation::List);
        let page = run_db(&self.db, move |db| Ok(DataManager::<T>::list(db, &scope, &filter)?)).await?;
        Ok(envelope::with_page(Details::new(&trace, Some(&session.context)), page))
    }

    #[instrument(skip_all, fields(entity = self.name, operation = "archive", trace_id = %trace.0,
        user_id = %session.user_id(), household_id = %session.household_id(), id = tracing::field::Empty))]
    pub async fn archive(&self, session: Session, params: PathParams, trace: TraceId) -> ApiResult<Response> {
        let parents = self.resolve_parents(&params)?;
        let id = self.id.fetch(&params)?;
        Span::current().record("id", id.as_str());
        (self.authorize)(&session, Operation::Archive, &parents, Some(&id))?;

        let scope = (self.scope)(&session, &parents, Operation::Archive);
        let target = id.clone();
        run_db(&self.db, move |db| {
            if !DataManager::<T>::exists(db, &target, &scope)? {
                return Err(ApiError::NotFound);
            }
            Ok(DataManager::<T>::archive(db, &target, &scope)?)
        })
        .await?;

        self.announce(&session, EventType::Archived, T::reference(id)).await;
        Ok(envelope::no_content())
    }
}

impl<T, C> ResourceService<T, C>
where
    T: Record + Entity + Updatable + Serialize + PartialEq + Sync,
    T::Input: Validate + Send + 'static,
    C: Validate + Send + 'static,
{
    /// Partial update: absent input fields keep their stored values. An
    /// update that changes nothing skips the write but still answers and
    /// publishes like any other.
    #[instrument(skip_all, fields(entity = self.name, operation = "update", trace_id = %trace.0,
        user_id = %session.user_id(), household_id = %session.household_id(), id = tracing::field::Empty))]
    pub async fn update(&self, session: Session, params: PathParams, trace: TraceId, input: T::Input) -> ApiResult<Response> {
        let parents = self.resolve_parents(&params)?;
        let id = self.id.fetch(&params)?;
        Span::current().record("id", id.as_str());
        (self.authorize)(&session, Operation::Update, &parents, Some(&id))?;
        input.validate()?;

        let scope = (self.scope)(&session, &parents, Operation::Update);
        let check = self.check;
        let entity = run_db(&self.db, move |db| {
            let mut entity: T = DataManager::<T>::get(db, &id, &scope)?;
            let before = entity.clone();
            entity.apply(input);
            if entity != before {
                check(&entity)?;
                db.update(&mut entity)?;
            }
            Ok(entity)
        })
        .await?;

        self.announce(&session, EventType::Updated, entity.to_change()).await;
        Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), entity))
    }
}

/// Registers create and list on `collection`.
pub fn bind_collection<R, T, C>(router: R, collection: &str, svc: &Arc<ResourceService<T, C>>) -> R
where
    R: RouteBinder,
    T: Record + Entity + Serialize + PartialEq + Sync,
    C: Validate + DeserializeOwned + Send + 'static,
{
    let create = Arc::clone(svc);
    let router = router.post(collection, move |session: Session, params: PathParams, trace: TraceId, JsonBody(input): JsonBody<C>| {
        let svc = Arc::clone(&create);
        async move { svc.create(session, params, trace, input).await }
    });
    bind_list(router, collection, svc)
}

/// Registers list alone, for collections that are only written through
/// dedicated operations.
pub fn bind_list<R, T, C>(router: R, collection: &str, svc: &Arc<ResourceService<T, C>>) -> R
where
    R: RouteBinder,
    T: Record + Entity + Serialize + PartialEq + Sync,
    C: Validate + Send + 'static,
{
    let list = Arc::clone(svc);
    router.get(collection, move |session: Session, params: PathParams, trace: TraceId, filter: Filter| {
        let svc = Arc::clone(&list);
        async move { svc.list(session, params, trace, filter).await }
    })
}

/// Registers read and archive on `item`.
pub fn bind_item<R, T, C>(router: R, item: &str, svc: &Arc<ResourceService<T, C>>) -> R
where
    R: RouteBinder,
    T: Record + Entity + Serialize + PartialEq + Sync,
    C: Validate + Send + 'static,
{
    let read = Arc::clone(svc);
    let archive = Arc::clone(svc);
    router
        .get(item, move |session: Session, params: PathParams, trace: TraceId| {
            let svc = Arc::clone(&read);
            async move { svc.read(session, params, trace).await }
        })
        .delete(item, move |session: Session, params: PathParams, trace: TraceId| {
            let svc = Arc::clone(&archive);
            async move { svc.archive(session, params, trace).await }
        })
}

/// Registers the partial update on `item`.
pub fn bind_update<R, T, C>(router: R, item: &str, svc: &Arc<ResourceService<T, C>>) -> R
where
    R: RouteBinder,
    T: Record + Entity + Updatable + Serialize + PartialEq + Sync,
    T::Input: Validate + DeserializeOwned + Send + 'static,
    C: Validate + Send + 'static,
{
    let update = Arc::clone(svc);
    router.put(item, move |session: Session, params: PathParams, trace: TraceId, JsonBody(input): JsonBody<T::Input>| {
        let svc = Arc::clone(&update);
        async move { svc.update(session, params, trace, input).await }
    })
}

/// The full set: create, list, read, update and archive.
pub fn bind_crud<R, T, C>(router: R, collection: &str, id: RouteParam, svc: ResourceService<T, C>) -> R
where
    R: RouteBinder,
    T: Record + Entity + Updatable + Serialize + PartialEq + Sync,
    T::Input: Validate + DeserializeOwned + Send + 'static,
    C: Validate + DeserializeOwned + Send + 'static,
{
    let svc = Arc::new(svc);
    let item = format!("{}/{}", collection, id.placeholder());
    let router = bind_collection(router, collection, &svc);
    let router = bind_item(router, &item, &svc);
    bind_update(router, &item, &svc)
}
