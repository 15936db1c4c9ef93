use http::HeaderValue;
use seasaw::operation::Operation;
use seasaw::validation::JsonSchema;
use seasaw::{App, AppOptions, BoxError, Flow, Reply, RequestContext, RouteOptions, middleware_fn, response};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
struct User {
    name: String,
    age: u32,
}

fn handle_user(_ctx: RequestContext) -> Operation<http::Response<seasaw::ResponseBody>> {
    Operation::new(|_scope| async { Ok::<_, BoxError>(response::json(&User { name: "gary".into(), age: 18 })) })
}

#[tokio::main]
async fn main() -> Result<(), seasaw::StartError> {
    let users = App::with_options(AppOptions::default().prefix("/users"))
        .get("/:id", |ctx: RequestContext| response::json(&ctx.param("id")))
        .post_with(
            "/",
            |ctx: RequestContext<User>| response::created(ctx.body()),
            RouteOptions::new().body(JsonSchema::<User>::new()),
        );

    App::with_options(AppOptions::default().port(3001))
        .use_middleware(middleware_fn(|ctx: RequestContext| async move {
            info!(path = ctx.uri().path(), "incoming request");
            ctx.response().insert_header(http::header::SERVER, HeaderValue::from_static("seasaw"));
            Ok::<_, BoxError>(Flow::Continue)
        }))
        .static_response("/plain", response::json(&"Hello, 世界"))
        .get("/", |_ctx: RequestContext| response::json(&"Hello, 世界"))
        .get("/deferred", |_ctx: RequestContext| {
            Reply::deferred(async { Ok::<_, BoxError>(response::json(&User { name: "gary".into(), age: 18 })) })
        })
        .get("/user", handle_user)
        .group_at("/api", users)
        .start(|running| info!(address = %running.local_addr(), "App is running"))
        .await
}
