use crate::cache::FetchRequest;
use http::Method;
use std::collections::BTreeSet;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Straight to network, never cached.
    Bypass,
    StaticAsset,
    Navigation,
    Other,
}

#[derive(Debug, Clone)]
pub struct RoutePolicy {
    bypass_hosts: Vec<String>,
    static_names: BTreeSet<String>,
    root_documents: BTreeSet<String>,
}

impl RoutePolicy {
    /// `manifest` entries ending in `/` name the root document of their directory.
    pub fn new(bypass_hosts: &[String], manifest: &[Url]) -> Self {
        let mut static_names = BTreeSet::new();
        let mut root_documents = BTreeSet::new();

        for url in manifest {
            match last_segment(url) {
                Some(name) => {
                    static_names.insert(name.to_string());
                }
                None => {
                    root_documents.insert(url.path().to_string());
                }
            }
        }

        Self {
            bypass_hosts: bypass_hosts
                .iter()
                .map(|host| host.trim().to_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
            static_names,
            root_documents,
        }
    }

    /// First match wins: bypass, static asset, navigation, everything else.
    pub fn classify(&self, request: &FetchRequest) -> RequestClass {
        if request.method != Method::GET || self.is_bypassed(&request.url) {
            return RequestClass::Bypass;
        }

        if self.is_static_asset(&request.url) {
            return RequestClass::StaticAsset;
        }

        if request.is_navigation() {
            return RequestClass::Navigation;
        }

        RequestClass::Other
    }

    fn is_bypassed(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default().to_lowercase();
        self.bypass_hosts.iter().any(|term| host.contains(term.as_str()))
    }

    fn is_static_asset(&self, url: &Url) -> bool {
        match last_segment(url) {
            Some(name) => self.static_names.contains(name),
            None => self.root_documents.contains(url.path()),
        }
    }
}

fn last_segment(url: &Url) -> Option<&str> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
}
