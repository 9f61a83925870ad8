use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, RwLock},
};

use anyhow::{Context, Result};
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Clone)]
struct Route {
    status: StatusCode,
    body: String,
}

#[derive(Default)]
struct Routes {
    by_path: HashMap<String, Route>,
    hits: HashMap<String, usize>,
    accept: HashMap<String, String>,
}

/// Loopback HTTP server answering GET requests with scripted bodies.
pub struct MockHttpServer {
    base: String,
    routes: Arc<RwLock<Routes>>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockHttpServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock HTTP listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let routes = Arc::new(RwLock::new(Routes::default()));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let shared = routes.clone();
        let make_service = make_service_fn(move |_| {
            let routes = shared.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(routes.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock HTTP server stopped: {err}");
            }
        });

        Ok(Self {
            base: format!("http://{addr}"),
            routes,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn respond(&self, path: &str, status: u16, body: impl Into<String>) {
        let status = StatusCode::from_u16(status).expect("valid status code");
        self.routes.write().expect("routes poisoned").by_path.insert(
            path.to_owned(),
            Route {
                status,
                body: body.into(),
            },
        );
    }

    pub fn hits(&self, path: &str) -> usize {
        self.routes
            .read()
            .expect("routes poisoned")
            .hits
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn last_accept(&self, path: &str) -> Option<String> {
        self.routes
            .read()
            .expect("routes poisoned")
            .accept
            .get(path)
            .cloned()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(
    routes: Arc<RwLock<Routes>>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let path = req.uri().path().to_owned();
    let route = {
        let mut routes = routes.write().expect("routes poisoned");
        *routes.hits.entry(path.clone()).or_insert(0) += 1;
        if let Some(accept) = req.headers().get(ACCEPT).and_then(|v| v.to_str().ok()) {
            routes.accept.insert(path.clone(), accept.to_owned());
        }
        routes.by_path.get(&path).cloned()
    };

    let response = match route {
        Some(route) => Response::builder()
            .status(route.status)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(route.body)),
        None => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from(format!("no route for {path}"))),
    };

    Ok(response.unwrap_or_else(|_| Response::new(Body::empty())))
}
