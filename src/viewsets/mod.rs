//! View sets: one request runs authenticate, authorize, resolve, execute,
//! render. A view set declares the actions it supports; everything else is
//! overridable on the [`ViewSet`] trait.

mod model;

pub use model::{ModelViewSet, ModelViewSetBuilder};

use crate::authentication::{Authenticator, Principal};
use crate::error::AppError;
use crate::filters::Filter;
use crate::models::Model;
use crate::parsers::Parser;
use crate::permissions::{first_denied, Permission};
use crate::renderers::Renderer;
use crate::request::{ApiRequest, ApiResponse, OperationContext};
use crate::serializers::{Context, Serializer};
use crate::store::{finish, paginate, ListMeta, Query, Store};
use crate::value::Record;
use async_trait::async_trait;
use axum::http::Method;
use serde_json::Value as Json;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    List,
    Retrieve,
    Create,
    Update,
    Destroy,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::List,
        Action::Retrieve,
        Action::Create,
        Action::Update,
        Action::Destroy,
    ];

    pub const READ_ONLY: [Action; 2] = [Action::List, Action::Retrieve];

    /// GET is a retrieve when the route carries a lookup key, a list otherwise.
    pub fn resolve(method: &Method, has_key: bool) -> Option<Action> {
        match (method, has_key) {
            (&Method::GET, true) => Some(Action::Retrieve),
            (&Method::GET, false) => Some(Action::List),
            (&Method::POST, _) => Some(Action::Create),
            (&Method::PATCH, _) | (&Method::PUT, _) => Some(Action::Update),
            (&Method::DELETE, _) => Some(Action::Destroy),
            _ => None,
        }
    }

    pub fn methods(self) -> &'static [&'static str] {
        match self {
            Action::List | Action::Retrieve => &["GET"],
            Action::Create => &["POST"],
            Action::Update => &["PATCH", "PUT"],
            Action::Destroy => &["DELETE"],
        }
    }

    pub fn needs_lookup(self) -> bool {
        matches!(self, Action::Retrieve | Action::Update | Action::Destroy)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::List => "list",
            Action::Retrieve => "retrieve",
            Action::Create => "create",
            Action::Update => "update",
            Action::Destroy => "destroy",
        }
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown action {}", s))
    }
}

/// HTTP methods reachable through `actions`, without duplicates.
pub fn allowed_methods(actions: &[Action]) -> Vec<&'static str> {
    let mut methods: Vec<&'static str> = Vec::new();
    for m in actions.iter().flat_map(|a| a.methods()) {
        if !methods.contains(m) {
            methods.push(m);
        }
    }
    methods
}

#[async_trait]
pub trait ViewSet: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &Arc<Model>;

    fn store(&self) -> Arc<dyn Store>;

    /// Serializer for output.
    fn serializer(&self, req: &ApiRequest, op: &OperationContext) -> Result<Arc<Serializer>, AppError>;

    /// Serializer for create and update input.
    fn write_serializer(&self, req: &ApiRequest, op: &OperationContext) -> Result<Arc<Serializer>, AppError> {
        self.serializer(req, op)
    }

    fn actions(&self) -> &[Action] {
        &Action::ALL
    }

    /// Route parameter (and column) identifying the target object.
    fn lookup_param(&self) -> &str {
        "uuid"
    }

    fn authenticators(&self) -> &[Arc<dyn Authenticator>] {
        &[]
    }

    fn permissions(&self) -> &[Arc<dyn Permission>] {
        &[]
    }

    fn filters(&self) -> &[Arc<dyn Filter>] {
        &[]
    }

    fn renderers(&self) -> &[Arc<dyn Renderer>] {
        &[]
    }

    fn parsers(&self) -> &[Arc<dyn Parser>] {
        &[]
    }

    /// `(default_per_page, max_per_page)`; lists are unpaginated when `None`.
    fn pagination(&self) -> Option<(u64, u64)> {
        None
    }

    fn context(&self, op: &OperationContext) -> Context {
        Context::default()
            .with_store(self.store())
            .with_principal(op.principal.clone())
    }

    /// Every row the caller may see.
    async fn get_qs(&self, _req: &ApiRequest, _op: &OperationContext) -> Result<Query, AppError> {
        Ok(Query::new(self.model().clone()))
    }

    async fn get_filtered_qs(&self, req: &ApiRequest, op: &OperationContext) -> Result<Query, AppError> {
        let mut qs = self.get_qs(req, op).await?;
        for filter in self.filters() {
            if op.is_list() || !filter.list_only() {
                qs = filter.filter(req, qs)?;
            }
        }
        Ok(qs)
    }

    /// Narrow `qs` to the object named by the route.
    fn lookup(&self, req: &ApiRequest, qs: Query) -> Result<Query, AppError> {
        let param = self.lookup_param();
        let key = req.path_param(param).ok_or_else(|| lookup_missing(param))?;
        Ok(qs.eq(param.to_string(), key))
    }

    /// The target object; the created one once a create has saved it.
    async fn get_obj(&self, req: &ApiRequest, op: &OperationContext) -> Result<Record, AppError> {
        if let Some(obj) = &op.object {
            return Ok(obj.clone());
        }
        let qs = self.lookup(req, self.get_filtered_qs(req, op).await?)?;
        self.store().first(&qs).await?.ok_or(AppError::NotFound)
    }

    /// Request body after every parser has run.
    fn parse_body(&self, req: &ApiRequest, op: &OperationContext) -> Result<Json, AppError> {
        let mut data = req.json_body()?;
        for parser in self.parsers() {
            data = parser.parse(req, op, data)?;
        }
        Ok(data)
    }

    async fn create_pre_save(&self, _req: &ApiRequest, _op: &OperationContext, _obj: &mut Record) -> Result<(), AppError> {
        Ok(())
    }

    async fn update_pre_save(&self, _req: &ApiRequest, _op: &OperationContext, _obj: &mut Record) -> Result<(), AppError> {
        Ok(())
    }

    async fn create_save_obj(&self, _req: &ApiRequest, _op: &OperationContext, obj: &mut Record) -> Result<(), AppError> {
        let mut tx = self.store().begin().await?;
        let result = tx.insert(self.model(), obj).await;
        finish(tx, result).await
    }

    async fn update_save_obj(&self, _req: &ApiRequest, _op: &OperationContext, obj: &mut Record) -> Result<(), AppError> {
        let mut tx = self.store().begin().await?;
        let result = tx.update(self.model(), obj).await;
        finish(tx, result).await
    }

    async fn destroy_remove_obj(&self, _req: &ApiRequest, _op: &OperationContext, obj: &Record) -> Result<(), AppError> {
        let mut tx = self.store().begin().await?;
        let result = tx.delete(self.model(), obj).await;
        finish(tx, result).await
    }

    async fn list(&self, req: &ApiRequest, op: &mut OperationContext) -> Result<ApiResponse, AppError> {
        let qs = self.get_filtered_qs(req, op).await?;
        let store = self.store();
        let rows = match self.pagination() {
            Some((default_per_page, max_per_page)) => {
                let page = paginate(
                    store.as_ref(),
                    &qs,
                    req.param_as_int("page")?,
                    req.param_as_int("per_page")?,
                    default_per_page,
                    max_per_page,
                )
                .await?;
                op.meta = Some(page.meta);
                page.items
            }
            None => {
                let rows = store.fetch(&qs).await?;
                op.meta = Some(ListMeta {
                    total: rows.len() as u64,
                    ..ListMeta::default()
                });
                rows
            }
        };
        let ctx = self.context(op);
        Ok(ApiResponse::ok(self.serializer(req, op)?.serialize_many(&rows, &ctx)))
    }

    async fn retrieve(&self, req: &ApiRequest, op: &mut OperationContext) -> Result<ApiResponse, AppError> {
        let obj = self.get_obj(req, op).await?;
        let ctx = self.context(op);
        Ok(ApiResponse::ok(self.serializer(req, op)?.serialize(&obj, &ctx)))
    }

    async fn create(&self, req: &ApiRequest, op: &mut OperationContext) -> Result<ApiResponse, AppError> {
        let data = self.parse_body(req, op)?;
        let ctx = self.context(op);
        let mut obj = self.write_serializer(req, op)?.save(None, &data, &ctx).await?;
        self.create_pre_save(req, op, &mut obj).await?;
        self.create_save_obj(req, op, &mut obj).await?;
        let body = self.serializer(req, op)?.serialize(&obj, &ctx);
        op.object = Some(obj);
        Ok(ApiResponse::created(body))
    }

    async fn update(&self, req: &ApiRequest, op: &mut OperationContext) -> Result<ApiResponse, AppError> {
        let obj = self.get_obj(req, op).await?;
        let data = self.parse_body(req, op)?;
        let ctx = self.context(op);
        let mut obj = self.write_serializer(req, op)?.save(Some(obj), &data, &ctx).await?;
        self.update_pre_save(req, op, &mut obj).await?;
        self.update_save_obj(req, op, &mut obj).await?;
        Ok(ApiResponse::no_content())
    }

    async fn destroy(&self, req: &ApiRequest, op: &mut OperationContext) -> Result<ApiResponse, AppError> {
        let obj = self.get_obj(req, op).await?;
        self.destroy_remove_obj(req, op, &obj).await?;
        Ok(ApiResponse::no_content())
    }
}

fn lookup_missing(param: &str) -> AppError {
    AppError::bad_request("Lookup ID not found", format!("{} not passed for lookup", param))
}

/// First principal any authenticator yields. With no authenticators the
/// caller is anonymous; with some and no success the request is refused.
pub async fn authenticate(
    authenticators: &[Arc<dyn Authenticator>],
    req: &ApiRequest,
) -> Result<Option<Principal>, AppError> {
    if authenticators.is_empty() {
        return Ok(None);
    }
    for auth in authenticators {
        if let Some(principal) = auth.authenticate(req).await? {
            return Ok(Some(principal));
        }
    }
    Err(AppError::Unauthorized {
        description: "Not Authorized".into(),
        challenges: authenticators.iter().map(|a| a.challenge()).collect(),
    })
}

/// Apply renderers; list-only ones only to list responses.
pub fn render<V: ViewSet + ?Sized>(vs: &V, req: &ApiRequest, op: &OperationContext, mut data: Json) -> Json {
    for renderer in vs.renderers() {
        if !renderer.list_only() || op.is_list() {
            data = renderer.render(req, op, data);
        }
    }
    data
}

/// Run one request through the view set.
pub async fn dispatch<V: ViewSet + ?Sized>(vs: &V, req: ApiRequest) -> Result<ApiResponse, AppError> {
    let principal = authenticate(vs.authenticators(), &req).await?;

    let has_key = req.path_param(vs.lookup_param()).is_some();
    let action = Action::resolve(&req.method, has_key)
        .filter(|a| vs.actions().contains(a))
        .ok_or_else(|| AppError::MethodNotAllowed {
            allowed: allowed_methods(vs.actions()),
        })?;
    if action.needs_lookup() && !has_key {
        return Err(lookup_missing(vs.lookup_param()));
    }

    let mut op = OperationContext::new(action);
    op.principal = principal;
    if let Some(i) = first_denied(vs.permissions(), &req, &op) {
        tracing::debug!(viewset = vs.name(), action = action.as_str(), permission = i, "permission denied");
        return Err(AppError::Forbidden);
    }

    tracing::debug!(viewset = vs.name(), action = action.as_str(), "dispatch");
    let mut response = match action {
        Action::List => vs.list(&req, &mut op).await?,
        Action::Retrieve => vs.retrieve(&req, &mut op).await?,
        Action::Create => vs.create(&req, &mut op).await?,
        Action::Update => vs.update(&req, &mut op).await?,
        Action::Destroy => vs.destroy(&req, &mut op).await?,
    };
    if let Some(body) = response.body.take() {
        response.body = Some(render(vs, &req, &op, body));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, ColumnType};
    use crate::serializers::{ModelSerializer, StringField};
    use crate::store::MemoryStore;
    use axum::http::{HeaderName, StatusCode};
    use serde_json::json;

    #[test]
    fn method_resolution() {
        assert_eq!(Action::resolve(&Method::GET, false), Some(Action::List));
        assert_eq!(Action::resolve(&Method::GET, true), Some(Action::Retrieve));
        assert_eq!(Action::resolve(&Method::PUT, true), Some(Action::Update));
        assert_eq!(Action::resolve(&Method::HEAD, false), None);
    }

    #[test]
    fn allowed_methods_are_unique() {
        assert_eq!(allowed_methods(&Action::READ_ONLY), vec!["GET"]);
        assert_eq!(
            allowed_methods(&Action::ALL),
            vec!["GET", "POST", "PATCH", "PUT", "DELETE"]
        );
    }

    #[test]
    fn actions_parse_by_name() {
        assert_eq!("destroy".parse::<Action>(), Ok(Action::Destroy));
        assert!("purge".parse::<Action>().is_err());
    }

    struct HeaderUser;

    #[async_trait]
    impl Authenticator for HeaderUser {
        async fn authenticate(&self, req: &ApiRequest) -> Result<Option<Principal>, AppError> {
            Ok(req.header("x-user").map(Principal::new))
        }

        fn challenge(&self) -> String {
            "X-User".into()
        }
    }

    /// Rows belong to whoever created them.
    struct Notes {
        model: Arc<Model>,
        store: Arc<dyn Store>,
        serializer: Arc<Serializer>,
        authenticators: Vec<Arc<dyn Authenticator>>,
    }

    impl Notes {
        fn new() -> Self {
            let model = Model::builder("notes")
                .column(Column::new("id", ColumnType::Integer).primary_key())
                .column(Column::new("owner", ColumnType::Text).not_null())
                .column(Column::new("body", ColumnType::Text))
                .build()
                .unwrap();
            let serializer = ModelSerializer::builder("notes")
                .model(model.clone())
                .field("owner", StringField::new().read_only(true).source("owner"))
                .build()
                .unwrap();
            Notes {
                model,
                store: Arc::new(MemoryStore::new()),
                serializer: Arc::new(serializer),
                authenticators: vec![Arc::new(HeaderUser)],
            }
        }
    }

    #[async_trait]
    impl ViewSet for Notes {
        fn name(&self) -> &str {
            "notes"
        }

        fn model(&self) -> &Arc<Model> {
            &self.model
        }

        fn store(&self) -> Arc<dyn Store> {
            self.store.clone()
        }

        fn serializer(&self, _req: &ApiRequest, _op: &OperationContext) -> Result<Arc<Serializer>, AppError> {
            Ok(self.serializer.clone())
        }

        fn lookup_param(&self) -> &str {
            "id"
        }

        fn authenticators(&self) -> &[Arc<dyn Authenticator>] {
            &self.authenticators
        }

        async fn get_qs(&self, _req: &ApiRequest, op: &OperationContext) -> Result<Query, AppError> {
            let owner = op.principal.as_ref().map(|p| p.id.clone()).unwrap_or_default();
            Ok(Query::new(self.model.clone()).eq("owner", owner))
        }

        async fn create_pre_save(&self, _req: &ApiRequest, op: &OperationContext, obj: &mut Record) -> Result<(), AppError> {
            if let Some(p) = &op.principal {
                obj.set("owner", p.id.clone());
            }
            Ok(())
        }
    }

    fn as_user(method: Method, user: &str) -> ApiRequest {
        ApiRequest::new(method).with_header(HeaderName::from_static("x-user"), user)
    }

    #[tokio::test]
    async fn hooks_scope_rows_to_the_caller() {
        let vs = Notes::new();
        let created = dispatch(&vs, as_user(Method::POST, "ann").with_json(&json!({"id": 1, "body": "hi"})))
            .await
            .unwrap();
        assert_eq!(created.status, StatusCode::CREATED);
        assert_eq!(created.body.unwrap()["owner"], "ann");
        dispatch(&vs, as_user(Method::POST, "bob").with_json(&json!({"id": 2})))
            .await
            .unwrap();

        let listed = dispatch(&vs, as_user(Method::GET, "ann")).await.unwrap();
        assert_eq!(listed.body.unwrap(), json!([{"id": 1, "owner": "ann", "body": "hi"}]));

        let err = dispatch(&vs, as_user(Method::GET, "ann").with_path_param("id", "2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn owner_cannot_be_written() {
        let vs = Notes::new();
        let err = dispatch(
            &vs,
            as_user(Method::POST, "ann").with_json(&json!({"id": 1, "owner": "bob"})),
        )
        .await
        .unwrap_err();
        let AppError::Validation(e) = err else {
            panic!("expected a validation error");
        };
        assert_eq!(e.messages("owner"), vec!["Field is read-only."]);
    }

    #[tokio::test]
    async fn unauthenticated_request_lists_challenges() {
        let vs = Notes::new();
        let err = dispatch(&vs, ApiRequest::new(Method::GET)).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Unauthorized { ref challenges, .. } if challenges == &["X-User".to_string()]
        ));
    }

    #[tokio::test]
    async fn destroy_needs_a_key_and_delete_is_204() {
        let vs = Notes::new();
        dispatch(&vs, as_user(Method::POST, "ann").with_json(&json!({"id": 7})))
            .await
            .unwrap();
        let err = dispatch(&vs, as_user(Method::DELETE, "ann")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let done = dispatch(&vs, as_user(Method::DELETE, "ann").with_path_param("id", "7"))
            .await
            .unwrap();
        assert_eq!(done.status, StatusCode::NO_CONTENT);
        assert!(done.body.is_none());
        let listed = dispatch(&vs, as_user(Method::GET, "ann")).await.unwrap();
        assert_eq!(listed.body.unwrap(), json!([]));
    }
}
