use httpmock::prelude::*;
use httpmock::{
    Mock,
    Then,
    When,
};
use serde::Serialize;
use serde_json::json;

use crate::constants::*;

pub struct MockServerBuilder {
    server: MockServer,
    handlers: Vec<(Box<dyn Fn(When, Then)>, usize)>,
    mock_ids: Vec<(usize, usize)>,
}

fn print_req(req: &HttpMockRequest) -> bool {
    // Use println instead of info! so that this works outside of the lib crate
    println!("    Received: {} {}", req.method(), req.uri().path());
    true
}

impl MockServerBuilder {
    pub fn new() -> MockServerBuilder {
        MockServerBuilder {
            server: MockServer::start(),
            handlers: vec![],
            mock_ids: vec![],
        }
    }

    pub fn assert(&self) {
        for (id, hits) in &self.mock_ids {
            println!("checking assertions for mock {id}");
            Mock::new(*id, &self.server).assert_hits(*hits)
        }
    }

    pub fn handle<F: Fn(When, Then) + 'static>(&mut self, f: F) -> &mut Self {
        self.handle_multiple(1, f)
    }

    pub fn handle_multiple<F: Fn(When, Then) + 'static>(&mut self, hits: usize, f: F) -> &mut Self {
        self.handlers.push((
            Box::new(move |w, t| {
                let w = w.matches(print_req);
                f(w, t);
            }),
            hits,
        ));
        self
    }

    pub fn handle_not_found(&mut self, path: String) -> &mut Self {
        self.handle(move |when, then| {
            when.method(GET).path(&path);
            then.status(404).json_body(status_not_found());
        })
    }

    pub fn build(&mut self) {
        for (f, hits) in self.handlers.iter() {
            self.mock_ids.push((self.server.mock(f).id, *hits));
        }

        // Anything not matched above (e.g., audit events, which the controllers only ever log
        // failures for) gets a 404; this has to go last so the real rules match first
        self.server.mock(|when, then| {
            when.matches(print_req);
            then.status(404).json_body(status_not_found());
        });
    }

    pub fn url(&self) -> http::Uri {
        http::Uri::try_from(self.server.url("/")).unwrap()
    }
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn make_fake_apiserver() -> (MockServerBuilder, kube::Client) {
    let builder = MockServerBuilder::new();
    let config = kube::Config::new(builder.url());
    let client = kube::Client::try_from(config).unwrap();
    (builder, client)
}

// Paths for the kinds the controllers touch, all in the test namespace
pub fn kmake_path(plural: &str) -> String {
    format!("/apis/bythepowerof.github.com/v1/namespaces/{TEST_NAMESPACE}/{plural}")
}

pub fn core_path(plural: &str) -> String {
    format!("/api/v1/namespaces/{TEST_NAMESPACE}/{plural}")
}

pub fn batch_path(plural: &str) -> String {
    format!("/apis/batch/v1/namespaces/{TEST_NAMESPACE}/{plural}")
}

pub fn list_body<K: Serialize>(items: &[K]) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "List",
        "metadata": {},
        "items": items,
    })
}

pub fn status_not_found() -> serde_json::Value {
    json!({
      "kind": "Status",
      "apiVersion": "v1",
      "metadata": {},
      "status": "Failure",
      "reason": "NotFound",
      "code": 404
    })
}
