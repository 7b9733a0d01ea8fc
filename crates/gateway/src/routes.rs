use std::collections::BTreeMap;

use axum::{
    Router,
    extract::Request,
    routing::{MethodFilter, MethodRouter, on},
};
use flavor::CANONICAL_FLAVOR;
use http::Method;

use crate::{Gateway, handler};

/// A flavor service endpoint mounted at one path.
struct Mount {
    method: Method,
    flavor: String,
    service: String,
}

/// Mount every HTTP endpoint of every flavor:
///
/// - at its bare path when the flavor asks for raw routes,
/// - under `/aog/<version>/api_flavors/<flavor>`,
/// - under `/aog/<version>/services` for the canonical flavor.
///
/// The first flavor to claim a method and path keeps it.
pub(crate) fn flavor_routes(gateway: &Gateway) -> Router {
    let version = gateway.api_version();
    let mut paths: BTreeMap<String, Vec<Mount>> = BTreeMap::new();

    for flavor in gateway.flavors().iter() {
        for (service_name, service) in flavor.services() {
            if !service.is_http() {
                log::debug!("flavor {} service {service_name} is not served over HTTP", flavor.name());
                continue;
            }

            for endpoint in service.endpoints() {
                let mut prefixes = vec![format!("/aog/{version}/api_flavors/{}", flavor.name())];

                if service.install_raw_routes() {
                    prefixes.push(String::new());
                }

                if flavor.name() == CANONICAL_FLAVOR {
                    prefixes.push(format!("/aog/{version}/services"));
                }

                for prefix in prefixes {
                    let path = format!("{prefix}{}", endpoint.path);
                    let mounts = paths.entry(path.clone()).or_default();

                    if let Some(existing) = mounts.iter().find(|mount| mount.method == endpoint.method) {
                        log::warn!(
                            "{} {path} of flavor {} is already served by flavor {}, skipping it",
                            endpoint.method,
                            flavor.name(),
                            existing.flavor
                        );
                        continue;
                    }

                    mounts.push(Mount {
                        method: endpoint.method.clone(),
                        flavor: flavor.name().to_string(),
                        service: service_name.to_string(),
                    });
                }
            }
        }
    }

    let mut router = Router::new();
    let mut installed = 0;

    for (path, mounts) in paths {
        let mut method_router: Option<MethodRouter> = None;

        for Mount { method, flavor, service } in mounts {
            let Ok(filter) = MethodFilter::try_from(method.clone()) else {
                log::warn!("cannot route method {method} of {path}");
                continue;
            };

            log::debug!("{method} {path} -> {flavor}/{service}");

            let gateway = gateway.clone();

            let handler = move |request: Request| {
                let gateway = gateway.clone();
                let flavor = flavor.clone();
                let service = service.clone();

                async move { handler::handle(gateway, &flavor, &service, request).await }
            };

            method_router = Some(match method_router {
                Some(existing) => existing.on(filter, handler),
                None => on(filter, handler),
            });

            installed += 1;
        }

        if let Some(method_router) = method_router {
            router = router.route(&path, method_router);
        }
    }

    log::info!("installed {installed} flavor routes");

    router
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use config::GatewayConfig;
    use flavor::FlavorRegistry;
    use http::StatusCode;
    use registry::{MemoryStore, Registry};
    use telemetry::EventBus;
    use tower::ServiceExt;

    use super::*;
    use crate::FixedLoad;

    fn gateway() -> Gateway {
        let flavors = Arc::new(FlavorRegistry::builtin().unwrap());
        let registry = Registry::new(Arc::new(MemoryStore::default()), flavors);
        registry.seed_default_services().unwrap();

        Gateway::with_load(
            &GatewayConfig::default(),
            registry,
            EventBus::new(),
            Arc::new(FixedLoad::default()),
        )
        .unwrap()
    }

    async fn status(router: &Router, method: Method, path: &str) -> StatusCode {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();

        router.clone().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn endpoints_are_mounted_under_every_prefix() {
        let router = gateway().router();

        // no provider is configured, so reaching the handler means a 500
        for path in [
            "/api/chat",
            "/aog/v0.2/api_flavors/ollama/api/chat",
            "/aog/v0.2/api_flavors/aog/chat",
            "/aog/v0.2/services/chat",
            "/v1/chat/completions",
            "/aog/v0.2/api_flavors/tencent/hunyuan/chat",
        ] {
            assert_eq!(
                status(&router, Method::POST, path).await,
                StatusCode::INTERNAL_SERVER_ERROR,
                "{path}"
            );
        }
    }

    #[tokio::test]
    async fn flavors_without_raw_routes_stay_prefixed() {
        let router = gateway().router();

        assert_eq!(status(&router, Method::POST, "/chat").await, StatusCode::NOT_FOUND);
        assert_eq!(status(&router, Method::POST, "/hunyuan/chat").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_method_is_rejected() {
        let router = gateway().router();

        assert_eq!(
            status(&router, Method::GET, "/aog/v0.2/services/chat").await,
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
