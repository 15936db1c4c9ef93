use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use seasaw::operation::{Operation, suspend, until};
use seasaw::validation::{JsonSchema, ValidationErrors};
use seasaw::{
    App, AppOptions, AppService, BoxError, Flow, RequestContext, ResponseBody, RouteOptions, Reply, middleware_fn, response,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

fn credentials(input: Value) -> Result<Credentials, ValidationErrors> {
    let credentials: Credentials = serde_json::from_value(input).map_err(|e| ValidationErrors::new(e.to_string()))?;
    if credentials.email.contains('@') {
        Ok(credentials)
    } else {
        Err(ValidationErrors::new("email must be an email address"))
    }
}

fn request(method: Method, path: &str, body: &'static str) -> Request<Bytes> {
    Request::builder().method(method).uri(path).body(Bytes::from_static(body.as_bytes())).unwrap()
}

async fn call(service: &AppService, method: Method, path: &str, body: &'static str) -> (StatusCode, Bytes) {
    let response = service.handle(request(method, path, body)).await.unwrap();
    (response.status(), response.into_body().into_bytes())
}

fn counting(counter: &Arc<AtomicUsize>, name: &'static str) -> impl Fn(RequestContext) -> Response<ResponseBody> + Send + Sync + 'static + use<> {
    let counter = Arc::clone(counter);
    move |_ctx: RequestContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        response::json(&name)
    }
}

#[tokio::test]
async fn each_route_invokes_only_its_handler() {
    let get = Arc::new(AtomicUsize::new(0));
    let post = Arc::new(AtomicUsize::new(0));
    let user = Arc::new(AtomicUsize::new(0));
    let service = App::new()
        .get("/", counting(&get, "get"))
        .post("/", counting(&post, "post"))
        .get("/users/:id", counting(&user, "user"))
        .into_service()
        .unwrap();

    let (status, body) = call(&service, Method::POST, "/", "").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from(r#""post""#));
    assert_eq!((get.load(Ordering::SeqCst), post.load(Ordering::SeqCst), user.load(Ordering::SeqCst)), (0, 1, 0));
}

#[tokio::test]
async fn later_registration_wins() {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let service = App::new().get("/dup", counting(&first, "first")).get("/dup", counting(&second, "second")).into_service().unwrap();

    let (_, body) = call(&service, Method::GET, "/dup", "").await;

    assert_eq!(body, Bytes::from(r#""second""#));
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn path_params_reach_handler() {
    let service = App::new()
        .get("/users/:id/posts/:post", |ctx: RequestContext| {
            response::json(&json!({ "id": ctx.param("id"), "post": ctx.param("post") }))
        })
        .into_service()
        .unwrap();

    let (_, body) = call(&service, Method::GET, "/users/7/posts/hello", "").await;

    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({ "id": "7", "post": "hello" }));
}

#[tokio::test]
async fn grouped_routes_are_mounted_under_both_prefixes() {
    let items = App::with_options(AppOptions::default().prefix("/items")).get("/x", |_ctx: RequestContext| response::json(&"x"));
    let service = App::new().group_at("/v1", items).into_service().unwrap();

    assert_eq!(call(&service, Method::GET, "/v1/items/x", "").await.0, StatusCode::OK);
    assert_eq!(call(&service, Method::GET, "/items/x", "").await.0, StatusCode::NOT_FOUND);
    assert_eq!(call(&service, Method::POST, "/v1/items/x", "").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unmatched_path_is_not_found() {
    let service = App::new().get("/", |_ctx: RequestContext| response::json(&"home")).into_service().unwrap();

    let (status, body) = call(&service, Method::GET, "/missing", "").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, Bytes::from(r#""Not Found""#));
}

#[tokio::test]
async fn custom_method_route() {
    let service = App::new().custom("/rpc", |_ctx: RequestContext| response::json(&"custom")).into_service().unwrap();
    let method = Method::from_bytes(b"CUSTOM").unwrap();

    assert_eq!(call(&service, method, "/rpc", "").await.1, Bytes::from(r#""custom""#));
}

fn login_app(calls: &Arc<AtomicUsize>) -> AppService {
    let calls = Arc::clone(calls);
    App::new()
        .post_with(
            "/login",
            move |ctx: RequestContext<Credentials>| {
                calls.fetch_add(1, Ordering::SeqCst);
                let Credentials { email, password } = ctx.into_body();
                response::json(&json!({ "email": email, "password": password }))
            },
            RouteOptions::new().body(credentials),
        )
        .into_service()
        .unwrap()
}

#[tokio::test]
async fn validated_body_reaches_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let service = login_app(&calls);

    let (status, body) = call(&service, Method::POST, "/login", r#"{"email":"a@b.com","password":"x"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({ "email": "a@b.com", "password": "x" }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_body_is_rejected() {
    let calls = Arc::new(AtomicUsize::new(0));
    let service = login_app(&calls);

    let (status, body) = call(&service, Method::POST, "/login", r#"{"email":"not-an-email"}"#).await;
    let body: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().is_some_and(|message| !message.is_empty()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let calls = Arc::new(AtomicUsize::new(0));
    let service = login_app(&calls);

    let (status, body) = call(&service, Method::POST, "/login", "{not json").await;
    let body: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "E000400");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn json_schema_route() {
    let service = App::new()
        .put_with(
            "/profile",
            |ctx: RequestContext<Credentials>| response::created(&ctx.body().email),
            RouteOptions::new().body(JsonSchema::<Credentials>::new()),
        )
        .into_service()
        .unwrap();

    let (status, body) = call(&service, Method::PUT, "/profile", r#"{"email":"a@b.com","password":"x"}"#).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, Bytes::from(r#""a@b.com""#));
}

#[tokio::test]
async fn result_shapes_are_indistinguishable() {
    let service = App::new()
        .get("/immediate", |_ctx: RequestContext| response::created(&json!({ "ok": true })))
        .get("/deferred", |_ctx: RequestContext| {
            Reply::deferred(async {
                tokio::time::sleep(Duration::from_millis(2)).await;
                Ok::<_, BoxError>(response::created(&json!({ "ok": true })))
            })
        })
        .get("/operation", |_ctx: RequestContext| {
            Operation::new(|scope| async move {
                scope
                    .run(until(async {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        Ok::<_, BoxError>(())
                    }))
                    .await?;
                Ok::<_, BoxError>(response::created(&json!({ "ok": true })))
            })
        })
        .into_service()
        .unwrap();

    let immediate = call(&service, Method::GET, "/immediate", "").await;
    let deferred = call(&service, Method::GET, "/deferred", "").await;
    let operation = call(&service, Method::GET, "/operation", "").await;

    assert_eq!(immediate.0, StatusCode::CREATED);
    assert_eq!(immediate, deferred);
    assert_eq!(immediate, operation);
}

#[tokio::test]
async fn handler_failure_is_internal_error() {
    let service = App::new()
        .delete("/fail", |_ctx: RequestContext| Reply::deferred(async { Err::<Response<ResponseBody>, _>("database unavailable") }))
        .into_service()
        .unwrap();

    let (status, body) = call(&service, Method::DELETE, "/fail", "").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, Bytes::from(r#"{"error":"Internal error"}"#));
}

#[tokio::test]
async fn middleware_accumulates_headers() {
    let service = App::new()
        .use_middleware(middleware_fn(|ctx: RequestContext| async move {
            ctx.response().insert_header(HeaderName::from_static("x-request-path"), HeaderValue::from_str(ctx.uri().path())?);
            Ok::<_, BoxError>(Flow::Continue)
        }))
        .get("/tagged", |_ctx: RequestContext| response::json(&"tagged"))
        .into_service()
        .unwrap();

    let response = service.handle(request(Method::GET, "/tagged", "")).await.unwrap();

    assert_eq!(response.headers()["x-request-path"], "/tagged");
}

#[tokio::test]
async fn middleware_state_is_visible_to_handler() {
    let service = App::new()
        .use_middleware(middleware_fn(|ctx: RequestContext| async move {
            ctx.state().insert("user", String::from("gary"));
            Ok::<_, BoxError>(Flow::Continue)
        }))
        .get("/me", |ctx: RequestContext| response::json(&*ctx.state().get::<String>("user").unwrap_or_default()))
        .into_service()
        .unwrap();

    assert_eq!(call(&service, Method::GET, "/me", "").await.1, Bytes::from(r#""gary""#));
}

#[tokio::test]
async fn before_hook_short_circuits() {
    let calls = Arc::new(AtomicUsize::new(0));
    let guard = |ctx: RequestContext| {
        let authorized = ctx.headers().contains_key("authorization");
        Operation::ready(if authorized { Flow::Continue } else { Flow::Respond(response::error(StatusCode::UNAUTHORIZED, &json!({ "error": "unauthorized" }))) })
    };
    let service = App::new()
        .get_with("/secret", counting(&calls, "secret"), RouteOptions::new().before(guard))
        .into_service()
        .unwrap();

    let (status, _) = call(&service, Method::GET, "/secret", "").await;
    let authorized = Request::get("/secret").header("authorization", "token").body(Bytes::new()).unwrap();
    let response = service.handle(authorized).await.unwrap();

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_middleware_is_internal_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let service = App::new()
        .use_middleware(|_ctx: RequestContext| Operation::<Flow>::fail("middleware broke"))
        .get("/", counting(&calls, "home"))
        .into_service()
        .unwrap();

    let (status, _) = call(&service, Method::GET, "/", "").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

async fn park_forever() -> Result<(), BoxError> {
    match suspend().await {}
}

#[tokio::test]
async fn halted_child_propagated_by_handler_is_internal_error() {
    let service = App::new()
        .get("/halt", |_ctx: RequestContext| {
            Operation::new(|scope| async move {
                let child = scope.spawn(Operation::new(|_| park_forever()));
                child.halt();
                child.join().await?;
                Ok(response::json(&"unreachable"))
            })
        })
        .into_service()
        .unwrap();

    let response = service.handle(request(Method::GET, "/halt", "")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

async fn tick_forever(counter: Arc<AtomicUsize>) -> Result<Flow, BoxError> {
    loop {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn shutdown_stops_middleware() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ticks);
    let service = App::new()
        .use_middleware(middleware_fn(move |_ctx: RequestContext| tick_forever(Arc::clone(&counter))))
        .get("/", |_ctx: RequestContext| response::json(&"never"))
        .into_service()
        .unwrap();

    let in_flight = tokio::spawn({
        let service = service.clone();
        async move { service.handle(request(Method::GET, "/", "")).await }
    });
    while ticks.load(Ordering::SeqCst) < 3 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    service.shutdown().await;

    assert!(in_flight.await.unwrap().is_err());
    let settled = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), settled);
}
