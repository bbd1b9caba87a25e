//! In-memory directory used by unit tests.
//!
//! MUST NEVER be used in production.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::{DirectoryConfig, Encryption};
use crate::error::{ConnectError, SessionError};
use crate::session::{Connector, DirectoryEntry, DirectorySession, SearchOutcome};

pub const BASE_DN: &str = "dc=example,dc=org";
pub const ADMIN_DN: &str = "cn=admin,dc=example,dc=org";
pub const ADMIN_PASSWORD: &str = "admin";

/// Most entries a single response carries, like a server `sizelimit`.
pub const SIZE_LIMIT: usize = 500;

const PROTOCOL_ERROR: u32 = 2;
const SIZE_LIMIT_EXCEEDED: u32 = 4;
const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
const FILTER_ERROR: u32 = 87;

/// Fault injected into the fake directory.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    Dial,
    Upgrade,
    /// Transport failure on any search using this exact filter.
    Search(String),
    /// Transport failure when binding as this DN.
    Bind(String),
}

/// Search issued against the fake directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Issued {
    pub filter: String,
    /// Requested page size, for paged searches.
    pub page_size: Option<i32>,
    /// Responses the server sent.
    pub pages: usize,
}

#[derive(Default)]
struct State {
    opened: AtomicUsize,
    open: AtomicUsize,
    unbound: AtomicUsize,
    searches: Mutex<Vec<Issued>>,
}

#[derive(Clone)]
pub struct FakeDirectory {
    entries: Vec<DirectoryEntry>,
    passwords: HashMap<String, String>,
    failures: Vec<Failure>,
    state: Arc<State>,
}

impl Default for FakeDirectory {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            passwords: HashMap::from([(ADMIN_DN.into(), ADMIN_PASSWORD.into())]),
            failures: Vec::new(),
            state: Arc::default(),
        }
    }
}

impl FakeDirectory {
    /// Configuration pointing at the fake directory.
    pub fn config() -> DirectoryConfig {
        DirectoryConfig {
            host: "ldap.test".into(),
            encryption: Encryption::StartTls,
            bind_dn: ADMIN_DN.into(),
            bind_password: ADMIN_PASSWORD.into(),
            base_dn: BASE_DN.into(),
            ..Default::default()
        }
    }

    pub fn with_entry(mut self, entry: DirectoryEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn with_password(mut self, dn: &str, password: &str) -> Self {
        self.passwords.insert(dn.into(), password.into());
        self
    }

    pub fn fail(mut self, failure: Failure) -> Self {
        self.failures.push(failure);
        self
    }

    /// Sessions opened since creation.
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Sessions not released yet.
    pub fn open_sessions(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Sessions closed with an unbind.
    pub fn unbound(&self) -> usize {
        self.state.unbound.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> Vec<Issued> {
        self.state.searches.lock().unwrap().clone()
    }

    fn session(&self) -> FakeSession {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        self.state.open.fetch_add(1, Ordering::SeqCst);
        FakeSession {
            directory: self.clone(),
            bound: None,
        }
    }

    fn has(&self, failure: &Failure) -> bool {
        self.failures.contains(failure)
    }
}

#[async_trait]
impl Connector for FakeDirectory {
    async fn connect(
        &self,
        config: &DirectoryConfig,
    ) -> Result<Box<dyn DirectorySession>, ConnectError> {
        if self.has(&Failure::Dial) {
            return Err(ConnectError::Dial("connection refused".into()));
        }

        let session = self.session();
        if config.encryption == Encryption::StartTls && self.has(&Failure::Upgrade) {
            drop(session);
            return Err(ConnectError::Upgrade("handshake failure".into()));
        }

        Ok(Box::new(session))
    }
}

struct FakeSession {
    directory: FakeDirectory,
    bound: Option<String>,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.directory.state.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeSession {
    fn run(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
        page_size: Option<i32>,
    ) -> Result<SearchOutcome, SessionError> {
        let mut issued = Issued {
            filter: filter.to_owned(),
            page_size,
            pages: 0,
        };
        let outcome = self.serve(base, filter, attrs, &mut issued);
        self.directory.state.searches.lock().unwrap().push(issued);
        outcome
    }

    fn serve(
        &self,
        base: &str,
        filter: &str,
        attrs: &[String],
        issued: &mut Issued,
    ) -> Result<SearchOutcome, SessionError> {
        if self.bound.is_none() {
            return Err(rejection(INSUFFICIENT_ACCESS_RIGHTS, "bind required"));
        }
        if self.directory.has(&Failure::Search(filter.to_owned())) {
            return Err(SessionError::Transport("connection reset".into()));
        }

        let parsed = Filter::parse(filter)
            .ok_or_else(|| rejection(FILTER_ERROR, "bad search filter"))?;
        let base = base.to_lowercase();
        let matched: Vec<_> = self
            .directory
            .entries
            .iter()
            .filter(|entry| entry.dn.to_lowercase().ends_with(&base))
            .filter(|entry| parsed.matches(entry))
            .map(|entry| project(entry, attrs))
            .collect();

        let page_size = match issued.page_size {
            None => SIZE_LIMIT,
            Some(size) => usize::try_from(size)
                .ok()
                .filter(|size| (1..=SIZE_LIMIT).contains(size))
                .ok_or_else(|| rejection(PROTOCOL_ERROR, "invalid page size"))?,
        };
        if issued.page_size.is_none() && matched.len() > SIZE_LIMIT {
            issued.pages = 1;
            return Err(rejection(SIZE_LIMIT_EXCEEDED, "size limit exceeded"));
        }

        let mut entries = Vec::with_capacity(matched.len());
        for page in matched.chunks(page_size) {
            issued.pages += 1;
            entries.extend_from_slice(page);
        }
        issued.pages = issued.pages.max(1);

        Ok(entries)
    }
}

#[async_trait]
impl DirectorySession for FakeSession {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), SessionError> {
        if self.directory.has(&Failure::Bind(dn.to_owned())) {
            return Err(SessionError::Transport("connection reset".into()));
        }

        match self.directory.passwords.get(dn) {
            Some(expected) if !password.is_empty() && expected == password => {
                self.bound = Some(dn.to_owned());
                Ok(())
            },
            _ => {
                self.bound = None;
                Err(rejection(SessionError::INVALID_CREDENTIALS, "invalid credentials"))
            },
        }
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
    ) -> Result<SearchOutcome, SessionError> {
        self.run(base, filter, attrs, None)
    }

    async fn search_paged(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
        page_size: i32,
    ) -> Result<SearchOutcome, SessionError> {
        self.run(base, filter, attrs, Some(page_size))
    }

    async fn unbind(&mut self) -> Result<(), SessionError> {
        self.bound = None;
        self.directory.state.unbound.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn rejection(code: u32, text: &str) -> SessionError {
    SessionError::Result {
        code,
        text: text.into(),
    }
}

/// Keeps only requested attributes, as a server would.
fn project(entry: &DirectoryEntry, attrs: &[String]) -> DirectoryEntry {
    DirectoryEntry {
        dn: entry.dn.clone(),
        attrs: entry
            .attrs
            .iter()
            .filter(|(name, _)| attrs.iter().any(|a| a.eq_ignore_ascii_case(name)))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect(),
    }
}

/// Subset of RFC 4515 filters: and, or, not, equality, presence.
#[derive(Debug)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal(String, String),
    Present(String),
}

impl Filter {
    fn parse(input: &str) -> Option<Self> {
        let (filter, rest) = Self::parse_one(input.trim())?;
        rest.is_empty().then_some(filter)
    }

    fn parse_one(input: &str) -> Option<(Self, &str)> {
        let input = input.strip_prefix('(')?;
        match input.chars().next()? {
            op @ ('&' | '|') => {
                let mut rest = &input[1..];
                let mut items = Vec::new();
                while !rest.starts_with(')') {
                    let (item, remaining) = Self::parse_one(rest)?;
                    items.push(item);
                    rest = remaining;
                }
                let filter = if op == '&' {
                    Filter::And(items)
                } else {
                    Filter::Or(items)
                };
                Some((filter, &rest[1..]))
            },
            '!' => {
                let (inner, rest) = Self::parse_one(&input[1..])?;
                Some((Filter::Not(Box::new(inner)), rest.strip_prefix(')')?))
            },
            _ => {
                let end = input.find(')')?;
                let (attr, value) = input[..end].split_once('=')?;
                let filter = if value == "*" {
                    Filter::Present(attr.to_owned())
                } else {
                    Filter::Equal(attr.to_owned(), unescape(value))
                };
                Some((filter, &input[end + 1..]))
            },
        }
    }

    fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Filter::And(items) => items.iter().all(|f| f.matches(entry)),
            Filter::Or(items) => items.iter().any(|f| f.matches(entry)),
            Filter::Not(inner) => !inner.matches(entry),
            Filter::Present(attr) => !entry.values(attr).is_empty(),
            Filter::Equal(attr, value) => entry
                .values(attr)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value)),
        }
    }
}

fn unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 2 < bytes.len() {
            let byte = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = byte {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// `inetOrgPerson` entry under `ou=people`.
pub fn person(uid: &str, first: &str, last: &str, mail: &str) -> DirectoryEntry {
    let mut entry = DirectoryEntry::new(format!("uid={uid},ou=people,{BASE_DN}"))
        .with_attr("objectClass", ["top", "person", "inetOrgPerson"])
        .with_attr("uid", [uid])
        .with_attr("cn", [format!("{first} {last}").trim().to_owned()]);
    if !first.is_empty() {
        entry = entry.with_attr("givenName", [first]);
    }
    if !last.is_empty() {
        entry = entry.with_attr("sn", [last]);
    }
    if !mail.is_empty() {
        entry = entry.with_attr("mail", [mail]);
    }
    entry
}

/// `groupOfNames` entry under `ou=groups`.
pub fn group(cn: &str, members: &[&str]) -> DirectoryEntry {
    DirectoryEntry::new(format!("cn={cn},ou=groups,{BASE_DN}"))
        .with_attr("objectClass", ["top", "groupOfNames"])
        .with_attr("cn", [cn])
        .with_attr("member", members.iter().copied())
}

/// DN of the entry built by [`person`].
pub fn person_dn(uid: &str) -> String {
    format!("uid={uid},ou=people,{BASE_DN}")
}
