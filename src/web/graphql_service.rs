use std::cell::RefCell;

use actix_identity::Identity;
use actix_web::{Error, HttpRequest, HttpResponse, http::PathAndQuery, http::Uri, web};
use juniper::http::{graphiql::graphiql_source, GraphQLRequest};

use crate::AppData;

use super::errors::ServiceError;
use super::graphql_schema::Context;

pub async fn graphql(
    ctx: web::Data<AppData>,
    identity: Identity,
    request: HttpRequest,
    data: web::Json<GraphQLRequest>,
) -> Result<HttpResponse, Error> {
    let original_identity = identity.identity();
    let user_agent = request.headers()
        .get("User-Agent")
        .and_then(|x| x.to_str().ok())
        .map(|x| x.to_string());

    let app = ctx.into_inner();

    let (body, new_identity) = web::block(move || {
        let session = match original_identity.as_deref() {
            Some(id) => app.sessions.parse_identity(&app, id)?,
            None => None,
        };

        let req_ctx = Context {
            app: app.clone(),
            identity: RefCell::new(original_identity.clone()),
            user: RefCell::new(session.as_ref().map(|x| x.0.clone())),
            session: RefCell::new(session.map(|x| x.1)),
            user_agent,
            operation_name: data.operation_name().map(|x| x.to_string()),
        };
        // A stale cookie gets dropped even if the request itself fails
        if req_ctx.user.borrow().is_none() {
            req_ctx.identity.replace(None);
        }

        let res = data.execute(&app.graphql_schema, &req_ctx);
        let body = serde_json::to_string(&res)
            .map_err(|x| ServiceError::InternalServerError(x.to_string()))?;

        Ok::<_, ServiceError>((body, req_ctx.identity.into_inner()))
    }).await?;

    if new_identity != identity.identity() {
        match new_identity {
            None => identity.forget(),
            Some(x) => identity.remember(x),
        }
    }

    Ok(HttpResponse::Ok()
        .content_type("application/json")
        .body(body))
}

pub async fn graphiql(request: HttpRequest) -> HttpResponse {
    let mut orig = request.uri().clone().into_parts();
    orig.path_and_query = Some(PathAndQuery::from_static("/api/graphql"));
    let uri = Uri::from_parts(orig).expect("Cannot build URI");
    let html = graphiql_source(&uri.to_string());
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(html)
}
