//! A service's socket tree: loaded from a coordinator-hosted manifest,
//! materialized on demand, refreshed on watch fires (§4.6).

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::cell::RefCell;

use meshwire_proto::{resolve_kind, Kind, ServiceCfg};
use tracing::warn;

use crate::coordinator::{CoordPayload, RequestId, RequestTag};
use crate::reactor::Reactor;
use crate::router::CoordRouter;
use crate::socket::{Socket, SocketError};

/// Named socket tree for one running service instance.
///
/// The `_tick` socket is always present, registered before the manifest GET
/// ever completes, so a service receives heartbeats even with an empty or
/// still-loading manifest.
pub struct Service {
    pub srvtype: String,
    pub uuid: String,
    pub cell: String,
    pub sockets: HashMap<String, Rc<RefCell<Socket>>>,

    zmq_ctx: zmq::Context,
    reactor: Rc<Reactor>,
    manifest_request_id: Cell<Option<RequestId>>,
    configured: bool,
    on_config: Option<Box<dyn FnOnce(&Rc<RefCell<Service>>)>>,
}

impl Service {
    pub fn create(
        srvtype: impl Into<String>,
        uuid: impl Into<String>,
        cell: impl Into<String>,
        zmq_ctx: zmq::Context,
        reactor: Rc<Reactor>,
    ) -> Result<Rc<RefCell<Service>>, SocketError> {
        let uuid = uuid.into();
        let cell = cell.into();

        let tick = Socket::new("_tick", Kind::Sub, uuid.clone(), cell.clone(), &zmq_ctx)?;
        let mut sockets = HashMap::new();
        sockets.insert("_tick".to_string(), Rc::new(RefCell::new(tick)));

        Ok(Rc::new(RefCell::new(Self {
            srvtype: srvtype.into(),
            uuid,
            cell,
            sockets,
            zmq_ctx,
            reactor,
            manifest_request_id: Cell::new(None),
            configured: false,
            on_config: None,
        })))
    }

    /// Sets the callback fired exactly once, the first time the manifest is
    /// successfully applied.
    pub fn set_on_config(&mut self, cb: impl FnOnce(&Rc<RefCell<Service>>) + 'static) {
        self.on_config = Some(Box::new(cb));
    }

    /// `get(name)` (§4.6): a request for an undeclared socket is a
    /// programmer error, not a runtime condition to recover from.
    pub fn get(&self, name: &str) -> Rc<RefCell<Socket>> {
        self.sockets
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("service {:?} has no socket named {name:?}", self.srvtype))
    }

    /// Registers `_tick` with the reactor immediately, then issues the
    /// manifest's first watched GET.
    pub fn register_in_reactor(self_rc: &Rc<RefCell<Service>>, router: &CoordRouter) {
        let (reactor, tick) = {
            let svc = self_rc.borrow();
            (svc.reactor.clone(), svc.sockets.get("_tick").unwrap().clone())
        };
        Socket::register_in_reactor(&tick, &reactor, router);
        Service::start_manifest_watch(self_rc, router);
    }

    /// Issues a fresh watched GET on `/services/<srvtype>`, forgetting
    /// whichever prior watch this target held (a real ZooKeeper watch is
    /// one-shot; this is both the initial dispatch and the re-watch after a
    /// fire).
    fn start_manifest_watch(self_rc: &Rc<RefCell<Service>>, router: &CoordRouter) {
        let (srvtype, stale_id) = {
            let svc = self_rc.borrow();
            (svc.srvtype.clone(), svc.manifest_request_id.take())
        };
        if let Some(id) = stale_id {
            router.forget(id);
        }
        let path = format!("/services/{srvtype}");
        match router.coord.get_watch(&path) {
            Ok(id) => {
                router.register_service(id, self_rc.clone(), RequestTag::ServiceManifest);
                self_rc.borrow().manifest_request_id.set(Some(id));
            }
            Err(e) => warn!(target: "zsock", srvtype = srvtype.as_str(), error = %e, "manifest watch dispatch failed"),
        }
    }

    pub fn on_coord_event(self_rc: &Rc<RefCell<Service>>, tag: &RequestTag, payload: CoordPayload, router: &CoordRouter) {
        match tag {
            RequestTag::ServiceManifest => Service::handle_manifest_event(self_rc, payload, router),
            _ => unreachable!("a Service only ever waits on its manifest watch"),
        }
    }

    fn handle_manifest_event(self_rc: &Rc<RefCell<Service>>, payload: CoordPayload, router: &CoordRouter) {
        match payload {
            CoordPayload::WatchFired => Service::start_manifest_watch(self_rc, router),
            CoordPayload::Data(result) => {
                let srvtype = self_rc.borrow().srvtype.clone();
                match result {
                    Ok(bytes) => match ServiceCfg::parse(&bytes) {
                        Some(cfg) => Service::apply_config(self_rc, &cfg, router),
                        None => warn!(target: "zsock", srvtype, "manifest invalid, keeping prior configuration"),
                    },
                    Err(e) => warn!(target: "zsock", srvtype, error = %e, "manifest get failed"),
                }
            }
            _ => unreachable!("a manifest watch only ever yields Data or WatchFired"),
        }
    }

    /// Materializes every manifest-declared socket that doesn't already
    /// exist; an existing socket is left untouched, matching §7's explicit
    /// non-goal on config-drift reconciliation. Fires `on_config` once,
    /// after the first manifest that creates at least the declared sockets
    /// is applied.
    fn apply_config(self_rc: &Rc<RefCell<Service>>, cfg: &ServiceCfg, router: &CoordRouter) {
        let (zmq_ctx, reactor, uuid, cell, srvtype) = {
            let svc = self_rc.borrow();
            (
                svc.zmq_ctx.clone(),
                svc.reactor.clone(),
                svc.uuid.clone(),
                svc.cell.clone(),
                svc.srvtype.clone(),
            )
        };

        let mut created = Vec::new();
        for sock_cfg in &cfg.sockets {
            if self_rc.borrow().sockets.contains_key(&sock_cfg.name) {
                warn!(target: "zsock", socket = %sock_cfg.name, "socket already configured, config drift is unsupported, skipping");
                continue;
            }
            let kind = match resolve_kind(&sock_cfg.kind) {
                Ok(k) => k,
                Err(e) => {
                    warn!(target: "zsock", socket = %sock_cfg.name, error = %e, "unresolvable socket kind, skipping");
                    continue;
                }
            };
            let fullname = format!("{srvtype}.{}", sock_cfg.name);
            let mut sock = match Socket::new(fullname, kind, uuid.clone(), cell.clone(), &zmq_ctx) {
                Ok(s) => s,
                Err(e) => {
                    warn!(target: "zsock", socket = %sock_cfg.name, error = %e, "socket creation failed, skipping");
                    continue;
                }
            };
            sock.configure(sock_cfg);
            let sock_rc = Rc::new(RefCell::new(sock));
            self_rc
                .borrow_mut()
                .sockets
                .insert(sock_cfg.name.clone(), sock_rc.clone());
            created.push(sock_rc);
        }

        for sock_rc in &created {
            Socket::register_in_reactor(sock_rc, &reactor, router);
        }

        let already_configured = self_rc.borrow().configured;
        if !already_configured {
            self_rc.borrow_mut().configured = true;
            let cb = self_rc.borrow_mut().on_config.take();
            if let Some(cb) = cb {
                cb(self_rc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::fake::FakeCoordinator;
    use crate::reactor::Reactor;

    fn new_service(ctx: &zmq::Context) -> (Rc<RefCell<Service>>, Rc<FakeCoordinator>, Rc<CoordRouter>) {
        let fake = Rc::new(FakeCoordinator::new());
        let router = Rc::new(CoordRouter::new(fake.clone()));
        let reactor = Rc::new(Reactor::new(router.clone()));
        let svc = Service::create("A", "u-1", "cell-1", ctx.clone(), reactor).unwrap();
        (svc, fake, router)
    }

    #[test]
    fn test_create_preregisters_tick_socket() {
        let ctx = zmq::Context::new();
        let (svc, _fake, _router) = new_service(&ctx);
        assert!(svc.borrow().sockets.contains_key("_tick"));
        assert_eq!(svc.borrow().get("_tick").borrow().fullname, "_tick");
    }

    #[test]
    #[should_panic(expected = "has no socket named")]
    fn test_get_unknown_socket_panics() {
        let ctx = zmq::Context::new();
        let (svc, _fake, _router) = new_service(&ctx);
        let _ = svc.borrow().get("nonexistent");
    }

    #[test]
    fn test_apply_config_creates_sockets_and_fires_on_config_once() {
        let ctx = zmq::Context::new();
        let (svc, fake, router) = new_service(&ctx);
        svc.borrow_mut().set_on_config(|s| {
            s.borrow_mut().sockets.get("out").unwrap().borrow_mut().bind_set.insert(
                "marker".to_string(),
                "on_config fired".to_string(),
            );
        });

        Service::register_in_reactor(&svc, &router);
        let manifest_id = crate::coordinator::RequestId(0);

        let json = r#"{"name":"A","sockets":[{"name":"out","type":"zmq:PUB","bind":["inproc://svc-test"]}]}"#;
        fake.complete_data(manifest_id, Ok(json.as_bytes().to_vec()));
        router.dispatch_ready();

        assert!(svc.borrow().sockets.contains_key("out"));
        assert!(svc.borrow().configured);
        assert_eq!(
            svc.borrow().get("out").borrow().bind_set.get("marker").unwrap(),
            "on_config fired"
        );
    }

    #[test]
    fn test_apply_config_skips_existing_socket_on_redelivery() {
        let ctx = zmq::Context::new();
        let (svc, fake, router) = new_service(&ctx);
        Service::register_in_reactor(&svc, &router);
        let manifest_id = crate::coordinator::RequestId(0);

        let json = r#"{"name":"A","sockets":[{"name":"out","type":"zmq:PUB","bind":["inproc://svc-test-2"]}]}"#;
        fake.complete_data(manifest_id, Ok(json.as_bytes().to_vec()));
        router.dispatch_ready();
        assert_eq!(svc.borrow().sockets.len(), 2); // _tick + out

        // manifest watch refired, same content: should not panic or duplicate.
        fake.fire_watch(manifest_id);
        router.dispatch_ready();
        let json_again = r#"{"name":"A","sockets":[{"name":"out","type":"zmq:PUB","bind":["inproc://svc-test-2"]}]}"#;
        let new_manifest_id = crate::coordinator::RequestId(1);
        fake.complete_data(new_manifest_id, Ok(json_again.as_bytes().to_vec()));
        router.dispatch_ready();

        assert_eq!(svc.borrow().sockets.len(), 2);
    }
}
