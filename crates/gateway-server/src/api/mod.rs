mod auth;
mod bookmarks;
mod devices;
mod hls;
mod snapshots;
mod streams;

use crate::state::AppState;
use axum::{routing::get, routing::post, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        // Auth
        .route("/v2/auth/token", post(auth::token))
        .route("/v2/auth/token/refresh", post(auth::refresh))
        .route("/v2/auth/token/revoke", post(auth::revoke))
        // Device lifecycle
        .route("/v1/devices/{id}/start-stream", post(devices::start_stream))
        .route("/v1/devices/{id}/stop-stream", post(devices::stop_stream))
        // Streams
        .route("/v2/streams", get(streams::list_streams))
        .route("/v2/streams/{id}", get(streams::get_stream))
        .route("/v2/streams/{id}/health", get(streams::get_stream_health))
        .route(
            "/v2/streams/{id}/router-capabilities",
            get(streams::get_router_capabilities),
        )
        .route("/v2/streams/{id}/consume", post(streams::consume))
        .route("/v2/streams/{id}/consumers", get(streams::list_consumers))
        .route(
            "/v2/streams/{id}/consumers/{cid}/connect",
            post(streams::connect_consumer),
        )
        .route(
            "/v2/streams/{id}/consumers/{cid}",
            axum::routing::delete(streams::delete_consumer),
        )
        // HLS playback
        .route("/v2/streams/{id}/hls/playlist.m3u8", get(hls::playlist))
        .route("/v2/streams/{id}/hls/{segment}", get(hls::segment))
        // Snapshots
        .route("/v2/streams/{id}/snapshots", post(snapshots::create_snapshot))
        .route("/v2/snapshots", get(snapshots::list_snapshots))
        .route(
            "/v2/snapshots/{id}",
            get(snapshots::get_snapshot).delete(snapshots::delete_snapshot),
        )
        .route("/v2/snapshots/{id}/image", get(snapshots::get_snapshot_image))
        // Bookmarks
        .route("/v2/streams/{id}/bookmarks", post(bookmarks::create_bookmark))
        .route("/v2/bookmarks", get(bookmarks::list_bookmarks))
        .route(
            "/v2/bookmarks/{id}",
            get(bookmarks::get_bookmark)
                .put(bookmarks::update_bookmark)
                .delete(bookmarks::delete_bookmark),
        )
        .route("/v2/bookmarks/{id}/video", get(bookmarks::get_bookmark_video))
        .route(
            "/v2/bookmarks/{id}/thumbnail",
            get(bookmarks::get_bookmark_thumbnail),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
