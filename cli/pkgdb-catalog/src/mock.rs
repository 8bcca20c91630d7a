//! A catalog client serving canned responses.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::client::ClientTrait;
use crate::error::CatalogError;
use crate::types::{CatalogPackage, LockedInput, PkgQueryArgs, SearchLimit, SearchResults};

pub type MockField<T> = Arc<Mutex<T>>;

#[derive(Debug, Clone)]
pub enum Response {
    Search(Vec<CatalogPackage>),
    Unavailable(String),
}

/// A search request as seen by the [MockClient]
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub input: LockedInput,
    pub args: PkgQueryArgs,
}

/// Answers searches with queued [Response]s, in order, and records requests.
#[derive(Debug, Default, Clone)]
pub struct MockClient {
    pub mock_responses: MockField<VecDeque<Response>>,
    pub requests: MockField<Vec<Request>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to the next search
    pub fn push_response(&self, response: Response) {
        lock(&self.mock_responses).push_back(response);
    }

    pub fn push_search_response(&self, packages: Vec<CatalogPackage>) {
        self.push_response(Response::Search(packages));
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.requests).clone()
    }
}

fn lock<T>(field: &MockField<T>) -> std::sync::MutexGuard<'_, T> {
    field.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ClientTrait for MockClient {
    async fn search(
        &self,
        input: &LockedInput,
        args: &PkgQueryArgs,
        limit: SearchLimit,
    ) -> Result<SearchResults, CatalogError> {
        lock(&self.requests).push(Request {
            input: input.clone(),
            args: args.clone(),
        });
        let response = lock(&self.mock_responses)
            .pop_front()
            .ok_or_else(|| CatalogError::Other("no mock responses remaining".to_string()))?;
        match response {
            Response::Search(packages) => {
                let count = Some(packages.len() as u64);
                let results = match limit {
                    Some(limit) => packages.into_iter().take(limit.get() as usize).collect(),
                    None => packages,
                };
                Ok(SearchResults { results, count })
            },
            Response::Unavailable(reason) => Err(CatalogError::Unavailable(reason)),
        }
    }

    fn source_id(&self) -> String {
        "mock".to_string()
    }
}
