use std::{io, sync::Arc};

use actix_web::{http::KeepAlive, middleware::Logger, rt::net::TcpStream, web, App, HttpServer};
use clap::Parser;
use log::{info, warn};

use server::{
    backends::HttpBackends,
    config::{mask, Args},
    routes,
    state::AppState,
    submission::Submitter,
};

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args = Args::parse();
    info!(
        "Using backends at {} with key {}",
        args.internal_api_url,
        mask(&args.api_key, 5)
    );

    let backends = Arc::new(
        HttpBackends::new(&args.internal_api_url, &args.api_key, args.backend_timeout)
            .map_err(io::Error::other)?,
    );
    let state = web::Data::new(AppState {
        submitter: Arc::new(Submitter::new(
            backends.clone(),
            backends.clone(),
            args.retry_policy(),
            args.render_base_url.clone(),
        )),
        renderer: backends,
        settings: args.settings(),
    });

    info!("Listening on {}:{}", args.bind_address, args.port);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(routes::configure)
    })
    .keep_alive(KeepAlive::Os)
    .on_connect(|conn, _ext| {
        if let Some(tcp) = conn.downcast_ref::<TcpStream>() {
            if let Err(e) = tcp.set_nodelay(true) {
                warn!("Could not disable Nagle's algorithm: {e}");
            }
        }
    })
    .bind((args.bind_address.as_str(), args.port))?
    .run()
    .await
}
