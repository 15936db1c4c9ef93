use seasaw::{App, RequestContext, response};

#[tokio::main]
async fn main() -> Result<(), seasaw::StartError> {
    App::new()
        .get("/", |_ctx: RequestContext| response::json(&"Hello World!"))
        .start(|running| println!("App is running at {}:{}", running.hostname(), running.port()))
        .await
}
