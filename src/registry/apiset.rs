//! APIset: a named, reference-counted directory of APIs with aliases,
//! classes, a subset chain, and staged initialization.
//!
//! Backed by a `DashMap` keyed by name, generalized to name -> descriptor/
//! alias routing, with a `start_api` fixed point that turns one-shot
//! per-module init into a re-entrant, class-and-dependency-aware
//! procedure.

use super::class::NameKind;
use super::descriptor::{fold, validate_name, ApiDescriptor, InitStatus};
use crate::error::{Error, Kind};
use crate::request::Request;
use crate::session::Credentials;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

enum Entry {
    Descriptor(Arc<ApiDescriptor>),
    Alias { target: String, original: String },
}

type OnLack = Arc<dyn Fn(&Arc<ApiSet>, &str) + Send + Sync>;

pub struct ApiSet {
    pub name: String,
    entries: DashMap<String, Entry>,
    /// class (folded) -> providing API canonical names
    classes: DashMap<String, Vec<String>>,
    subset: RwLock<Option<Arc<ApiSet>>>,
    timeout_secs: AtomicU32,
    on_lack: RwLock<Option<OnLack>>,
}

impl ApiSet {
    pub fn new(name: impl Into<String>, default_timeout_secs: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            entries: DashMap::new(),
            classes: DashMap::new(),
            subset: RwLock::new(None),
            timeout_secs: AtomicU32::new(default_timeout_secs),
            on_lack: RwLock::new(None),
        })
    }

    pub fn default_timeout(&self) -> u32 {
        self.timeout_secs.load(Ordering::Relaxed)
    }

    pub fn set_default_timeout(&self, secs: u32) {
        self.timeout_secs.store(secs, Ordering::Relaxed);
    }

    pub fn set_on_lack(&self, f: OnLack) {
        *self.on_lack.write() = Some(f);
    }

    /// Set the subset this set falls back to on a failed lookup. Fails with
    /// `NotFound` if it would introduce a cycle.
    pub fn set_subset(self: &Arc<Self>, sub: Arc<ApiSet>) -> Result<(), Error> {
        let mut cursor = Some(sub.clone());
        while let Some(cur) = cursor {
            if Arc::ptr_eq(&cur, self) {
                return Err(Error::with_detail(Kind::NotFound, "subset chain would cycle"));
            }
            cursor = cur.subset.read().clone();
        }
        *self.subset.write() = Some(sub);
        Ok(())
    }

    pub fn subset(&self) -> Option<Arc<ApiSet>> {
        self.subset.read().clone()
    }

    // ---- descriptors & aliases ----------------------------------------

    pub fn add(&self, name: &str, descriptor: ApiDescriptor) -> Result<(), Error> {
        validate_name(name)?;
        let key = fold(name);
        if self.entries.contains_key(&key) {
            return Err(Error::new(Kind::Exists));
        }
        self.entries.insert(key, Entry::Descriptor(Arc::new(descriptor)));
        Ok(())
    }

    pub fn add_alias(&self, target_name: &str, alias: &str) -> Result<(), Error> {
        validate_name(alias)?;
        let target_key = fold(target_name);
        if !self.entries.contains_key(&target_key) {
            return Err(Error::new(Kind::NotFound));
        }
        let alias_key = fold(alias);
        if self.entries.contains_key(&alias_key) {
            return Err(Error::new(Kind::Exists));
        }
        self.entries.insert(alias_key, Entry::Alias { target: target_key, original: alias.to_string() });
        Ok(())
    }

    pub fn del(&self, name: &str) -> Result<(), Error> {
        let key = fold(name);
        match self.entries.remove(&key) {
            None => Err(Error::new(Kind::NotFound)),
            Some((_, Entry::Alias { .. })) => Ok(()),
            Some((_, Entry::Descriptor(desc))) => {
                // Remove from every class's provider list.
                for mut providers in self.classes.iter_mut() {
                    providers.retain(|n| fold(n) != key);
                }
                // Remove any alias in this set pointing at it.
                self.entries.retain(|_, e| !matches!(e, Entry::Alias { target, .. } if *target == key));
                desc.imp.unref();
                Ok(())
            }
        }
    }

    fn resolve_local(&self, name: &str) -> Option<Arc<ApiDescriptor>> {
        let key = fold(name);
        match self.entries.get(&key)?.value() {
            Entry::Descriptor(d) => Some(d.clone()),
            Entry::Alias { target, .. } => match self.entries.get(target)?.value() {
                Entry::Descriptor(d) => Some(d.clone()),
                Entry::Alias { .. } => None,
            },
        }
    }

    /// Resolve `name`, optionally invoking `on_lack`, optionally recursing
    /// into the subset chain, optionally running the start procedure.
    pub async fn get_api(self: &Arc<Self>, name: &str, recursive: bool, must_start: bool) -> Result<Arc<ApiDescriptor>, Error> {
        let desc = self.lookup(name, recursive)?;
        if must_start {
            let status = self.start_api(&desc).await?;
            if status != InitStatus::Started {
                if let InitStatus::Failed(k) = status {
                    return Err(Error::new(k));
                }
                return Err(Error::new(Kind::BadApiState));
            }
        }
        Ok(desc)
    }

    fn lookup(self: &Arc<Self>, name: &str, recursive: bool) -> Result<Arc<ApiDescriptor>, Error> {
        if let Some(d) = self.resolve_local(name) {
            return Ok(d);
        }
        let cb = self.on_lack.read().clone();
        if let Some(cb) = cb {
            cb(self, name);
            if let Some(d) = self.resolve_local(name) {
                return Ok(d);
            }
        }
        if recursive {
            if let Some(sub) = self.subset() {
                return sub.lookup(name, recursive);
            }
        }
        Err(Error::new(Kind::NotFound))
    }

    // ---- classes ---------------------------------------------------------

    pub fn require(&self, name: &str, required_api: &str) -> Result<(), Error> {
        let desc = self.resolve_local(name).ok_or_else(|| Error::new(Kind::NotFound))?;
        desc.require_api(required_api);
        Ok(())
    }

    pub fn provide_class(&self, api_name: &str, class: &str) -> Result<(), Error> {
        if self.resolve_local(api_name).is_none() {
            return Err(Error::new(Kind::NotFound));
        }
        let mut providers = self.classes.entry(fold(class)).or_default();
        if !providers.iter().any(|n| fold(n) == fold(api_name)) {
            providers.push(api_name.to_string());
        }
        Ok(())
    }

    pub fn require_class(&self, api_name: &str, class: &str) -> Result<(), Error> {
        let desc = self.resolve_local(api_name).ok_or_else(|| Error::new(Kind::NotFound))?;
        desc.require_class(class);
        self.classes.entry(fold(class)).or_default();
        Ok(())
    }

    pub fn providers_of(&self, class: &str) -> Vec<String> {
        self.classes.get(&fold(class)).map(|v| v.clone()).unwrap_or_default()
    }

    /// Start every API providing `class`.
    pub async fn class_start(self: &Arc<Self>, class: &str) -> Result<(), Error> {
        for name in self.providers_of(class) {
            self.get_api(&name, false, true).await?;
        }
        Ok(())
    }

    // ---- staged initialization --------------------------------------------

    /// The fixed-point start procedure: resolve required
    /// classes, then required API dependencies, then run the descriptor's
    /// own `service_start` — all three must succeed for the API to reach
    /// `Started`. Already-`Starting` descriptors short-circuit (cycle-break).
    pub fn start_api<'a>(
        self: &'a Arc<Self>,
        desc: &'a Arc<ApiDescriptor>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<InitStatus, Error>> + Send + 'a>> {
        Box::pin(async move {
            {
                let status = desc.status();
                if status != InitStatus::NotStarted {
                    return Ok(status);
                }
            }
            desc.set_status(InitStatus::Starting);

            let classes_ok = self.start_required_classes(desc).await.is_ok();
            let apis_ok = classes_ok && self.start_required_apis(desc).await;

            let final_status = if classes_ok && apis_ok {
                match desc.imp.service_start().await {
                    Ok(()) => InitStatus::Started,
                    Err(e) => InitStatus::Failed(e.kind),
                }
            } else {
                InitStatus::Failed(Kind::NotAvailable)
            };
            desc.set_status(final_status);
            Ok(final_status)
        })
    }

    async fn start_required_classes(self: &Arc<Self>, desc: &Arc<ApiDescriptor>) -> Result<(), Error> {
        for class in desc.required_classes() {
            let providers = self.providers_of(&class);
            if providers.is_empty() {
                return Err(Error::new(Kind::NotFound));
            }
            let mut any_started = false;
            for name in providers {
                if let Some(provider) = self.resolve_local(&name) {
                    // A provider already `Starting` is a cycle-break: inspect
                    // its recorded status instead of re-entering.
                    if provider.status() == InitStatus::Starting {
                        continue;
                    }
                    if let Ok(InitStatus::Started) = self.start_api(&provider).await {
                        any_started = true;
                    }
                }
            }
            if !any_started {
                return Err(Error::new(Kind::NotAvailable));
            }
        }
        Ok(())
    }

    async fn start_required_apis(self: &Arc<Self>, desc: &Arc<ApiDescriptor>) -> bool {
        for name in desc.required_apis() {
            let Some(dep) = self.resolve_local(&name) else { return false };
            if dep.status() == InitStatus::Starting {
                // Cycle-break: trust that the cycle will complete elsewhere.
                continue;
            }
            match self.start_api(&dep).await {
                Ok(InitStatus::Started) => {}
                _ => return false,
            }
        }
        true
    }

    pub async fn start_all_services(self: &Arc<Self>) -> Result<(), Error> {
        let mut set: Option<Arc<ApiSet>> = Some(self.clone());
        while let Some(s) = set {
            let names: Vec<Arc<ApiDescriptor>> = s
                .entries
                .iter()
                .filter_map(|e| match e.value() {
                    Entry::Descriptor(d) => Some(d.clone()),
                    Entry::Alias { .. } => None,
                })
                .collect();
            for desc in names {
                if desc.status() == InitStatus::NotStarted {
                    self.start_api(&desc).await?;
                }
            }
            set = s.subset();
        }
        Ok(())
    }

    // ---- enumeration -------------------------------------------------------

    pub fn get_names(self: &Arc<Self>, recursive: bool, kind: NameKind) -> Vec<String> {
        let mut seen_keys = std::collections::HashSet::new();
        let mut names = Vec::new();
        let mut set: Option<Arc<ApiSet>> = Some(self.clone());
        while let Some(s) = set {
            for e in s.entries.iter() {
                let key = e.key().clone();
                if seen_keys.contains(&key) {
                    continue;
                }
                let include = match (kind, e.value()) {
                    (NameKind::Both, _) => true,
                    (NameKind::Descriptors, Entry::Descriptor(_)) => true,
                    (NameKind::Aliases, Entry::Alias { .. }) => true,
                    _ => false,
                };
                if include {
                    let original = match e.value() {
                        Entry::Descriptor(d) => d.name.clone(),
                        Entry::Alias { original, .. } => original.clone(),
                    };
                    names.push(original);
                }
                seen_keys.insert(key);
            }
            set = if recursive { s.subset() } else { None };
        }
        names.sort_by_key(|n| fold(n));
        names
    }

    pub fn enumerate(self: &Arc<Self>, recursive: bool, mut callback: impl FnMut(&ApiSet, &str, bool)) {
        let mut seen_keys = std::collections::HashSet::new();
        let mut set: Option<Arc<ApiSet>> = Some(self.clone());
        while let Some(s) = set {
            for e in s.entries.iter() {
                let key = e.key().clone();
                if seen_keys.contains(&key) {
                    continue;
                }
                let (original, is_alias) = match e.value() {
                    Entry::Descriptor(d) => (d.name.clone(), false),
                    Entry::Alias { original, .. } => (original.clone(), true),
                };
                callback(&s, &original, is_alias);
                seen_keys.insert(key);
            }
            set = if recursive { s.subset() } else { None };
        }
    }

    pub fn descriptor_count(&self) -> usize {
        self.entries.iter().filter(|e| matches!(e.value(), Entry::Descriptor(_))).count()
    }

    /// Resolve `request.apiname`, start it if needed, and hand the request
    /// to its implementation.
    pub async fn process(self: &Arc<Self>, request: Arc<Request>) -> Result<(), Error> {
        let desc = self.get_api(&request.apiname, true, true).await?;
        desc.imp.process(request).await;
        Ok(())
    }

    /// Like `process`, but first attaches credentials parsed from an
    /// exported `uid:gid:pid-label` string, impersonating whoever that
    /// string names.
    pub async fn process_on_behalf(self: &Arc<Self>, request: Arc<Request>, exported_cred: &str) -> Result<(), Error> {
        let cred = Credentials::from_exported(exported_cred)?;
        request.set_cred(Arc::new(cred));
        self.process(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use async_trait::async_trait;

    struct Noop;
    #[async_trait]
    impl super::super::descriptor::ApiImpl for Noop {
        async fn process(&self, _req: Arc<Request>) {}
    }

    #[tokio::test]
    async fn alias_resolves_case_insensitively() {
        let set = ApiSet::new("S", 10);
        set.add("Sadie", ApiDescriptor::new("Sadie", Arc::new(Noop), None)).unwrap();
        set.add_alias("Sadie", "Wendell").unwrap();
        let a = set.get_api("SADIE", false, false).await.unwrap();
        let b = set.get_api("wendell", false, false).await.unwrap();
        assert_eq!(a.name, "Sadie");
        assert_eq!(b.name, "Sadie");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn get_names_sorted_case_insensitive() {
        let set = ApiSet::new("S", 10);
        set.add("Sadie", ApiDescriptor::new("Sadie", Arc::new(Noop), None)).unwrap();
        set.add_alias("Sadie", "Wendell").unwrap();
        let names = set.get_names(false, NameKind::Both);
        assert_eq!(names, vec!["Sadie".to_string(), "Wendell".to_string()]);
    }

    #[test]
    fn subset_cycle_rejected() {
        let a = ApiSet::new("a", 10);
        let b = ApiSet::new("b", 10);
        b.set_subset(a.clone()).unwrap();
        assert!(a.set_subset(b.clone()).is_err());
    }

    #[tokio::test]
    async fn class_start_cycle_safe() {
        // armel requires albert; clara requires class a; ezra requires armel + class c;
        // chloe provides c,a; albert provides a; amelie provides a, requires albert+armel
        let set = ApiSet::new("s", 10);
        for name in ["armel", "clara", "ezra", "chloe", "albert", "amelie"] {
            set.add(name, ApiDescriptor::new(name, Arc::new(Noop), None)).unwrap();
        }
        set.require("armel", "albert").unwrap();
        set.require_class("clara", "a").unwrap();
        set.require("ezra", "armel").unwrap();
        set.require_class("ezra", "c").unwrap();
        set.provide_class("chloe", "c").unwrap();
        set.provide_class("chloe", "a").unwrap();
        set.provide_class("albert", "a").unwrap();
        set.provide_class("amelie", "a").unwrap();
        set.require("amelie", "albert").unwrap();
        set.require("amelie", "armel").unwrap();

        set.start_all_services().await.unwrap();

        for name in ["armel", "clara", "ezra", "chloe", "albert", "amelie"] {
            let desc = set.get_api(name, false, false).await.unwrap();
            assert_eq!(desc.status(), InitStatus::Started, "{name} should have started");
        }
    }
}
