//! The per-page engine: one [`PageController`] per page context.
//!
//! It owns the monitoring session, the overlay presenter and the artwork
//! resolver, and reacts to everything the host delivers (mutations,
//! navigation, visibility, storage changes, messages) plus its own timers.
//! All of it runs on one task; artwork lookups and palette downloads are
//! detached futures polled from the same loop.

use crate::artwork::{ArtworkLookup, ArtworkOutcome, ArtworkResolver, LookupResult, Resolution};
use crate::auth::{AuthLifecycle, AuthPhase, TokenService};
use crate::config::Timings;
use crate::core::identity::TrackIdentity;
use crate::core::messages::{BackgroundRequest, MessageReply, PageEvent, TabMessage};
use crate::core::page::PageKind;
use crate::dom::{Mutation, PageDom};
use crate::extractor::{extract_identity, is_eligible_for_artwork};
use crate::infra::rpc::RpcClient;
use crate::infra::storage::{keys, KeyValueStore, StorageChange};
use crate::navigation::NavigationCoordinator;
use crate::observer::{ChangeEvent, ObserverHandle};
use crate::overlay::{decide, OverlayPresenter, OverlayReport, OverlayState, Target};
use crate::palette::Palette;
use futures::future::LocalBoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use std::rc::Rc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};

/// Monitoring state of one page. The session is the only writer of
/// `last_identity` and the only owner of the observer.
#[derive(Default)]
pub struct MonitoringSession {
  active: bool,
  last_identity: TrackIdentity,
  observer: Option<ObserverHandle>,
}

impl MonitoringSession {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  pub fn last_identity(&self) -> &TrackIdentity {
    &self.last_identity
  }

  pub fn observer(&self) -> Option<&ObserverHandle> {
    self.observer.as_ref()
  }

  /// Begins a fresh session. Any observer from an earlier one is dropped.
  pub fn start(&mut self) {
    self.observer = None;
    self.active = true;
    self.last_identity = TrackIdentity::absent();
  }

  pub fn stop(&mut self) {
    self.active = false;
    self.observer = None;
  }

  pub fn attach(&mut self, observer: ObserverHandle) {
    self.observer = Some(observer);
  }

  pub fn reset_identity(&mut self) {
    self.last_identity = TrackIdentity::absent();
  }

  /// Stores `identity`; `false` when it equals the one already stored.
  pub fn record(&mut self, identity: &TrackIdentity) -> bool {
    if self.last_identity == *identity {
      return false;
    }
    self.last_identity = identity.clone();
    true
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Timer {
  Start,
  Attach,
  Evaluate,
  Restart,
  Poll,
}

struct Timers {
  start: Option<Instant>,
  attach: Option<Instant>,
  /// Identity reset followed by an evaluation.
  evaluate: Option<Instant>,
  /// Session restart after navigation has settled.
  restart: Option<Instant>,
  poll: Instant,
}

impl Timers {
  fn new(poll: Instant) -> Self {
    Self {
      start: None,
      attach: None,
      evaluate: None,
      restart: None,
      poll,
    }
  }

  fn earliest(&self) -> (Timer, Instant) {
    [
      (Timer::Start, self.start),
      (Timer::Attach, self.attach),
      (Timer::Evaluate, self.evaluate),
      (Timer::Restart, self.restart),
    ]
    .into_iter()
    .filter_map(|(timer, at)| at.map(|at| (timer, at)))
    .fold((Timer::Poll, self.poll), |earliest, candidate| {
      if candidate.1 < earliest.1 {
        candidate
      } else {
        earliest
      }
    })
  }

  fn clear_session_timers(&mut self) {
    self.start = None;
    self.attach = None;
    self.evaluate = None;
    self.restart = None;
  }
}

async fn next_timer(timers: &Timers) -> Timer {
  let (timer, at) = timers.earliest();
  sleep_until(at).await;
  timer
}

async fn next_change(observer: Option<&mut ObserverHandle>) -> Option<ChangeEvent> {
  match observer {
    Some(observer) => observer.next_change().await,
    None => std::future::pending().await,
  }
}

enum Wake {
  Event(Option<PageEvent>),
  Storage(StorageChange),
  Change(ChangeEvent),
  Artwork(ArtworkOutcome),
  Palette(String, Option<Palette>),
  Timer(Timer),
}

/// What a one-shot evaluation of a page came to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InspectReport {
  pub kind: PageKind,
  pub eligible: bool,
  pub identity: TrackIdentity,
  pub state: OverlayState,
  pub overlay: OverlayReport,
}

pub struct PageController<D, S, L, T> {
  dom: D,
  kind: PageKind,
  timings: Timings,
  session: MonitoringSession,
  presenter: OverlayPresenter,
  resolver: ArtworkResolver,
  navigation: NavigationCoordinator,
  auth: AuthLifecycle<S, T>,
  lookup: Rc<L>,
  rpc: RpcClient,
  storage: broadcast::Receiver<StorageChange>,
  fetches: FuturesUnordered<LocalBoxFuture<'static, ArtworkOutcome>>,
  palettes: FuturesUnordered<LocalBoxFuture<'static, (String, Option<Palette>)>>,
  palette_client: Option<reqwest::Client>,
  /// Identity a token refresh was already spent on.
  refreshed_for: Option<TrackIdentity>,
  timers: Timers,
}

impl<D, S, L, T> PageController<D, S, L, T>
where
  D: PageDom,
  S: KeyValueStore,
  L: ArtworkLookup + 'static,
  T: TokenService,
{
  pub fn new(dom: D, timings: Timings, auth: AuthLifecycle<S, T>, lookup: L, rpc: RpcClient) -> Self {
    let location = dom.location();
    let storage = auth.store().subscribe();
    Self {
      kind: PageKind::from_url(&location),
      navigation: NavigationCoordinator::new(&location),
      dom,
      timings,
      session: MonitoringSession::new(),
      presenter: OverlayPresenter::new(),
      resolver: ArtworkResolver::new(),
      auth,
      lookup: Rc::new(lookup),
      rpc,
      storage,
      fetches: FuturesUnordered::new(),
      palettes: FuturesUnordered::new(),
      palette_client: None,
      refreshed_for: None,
      timers: Timers::new(Instant::now() + timings.navigation_poll),
    }
  }

  /// Enables the artwork palette background, downloaded with `client`.
  pub fn with_palette_client(mut self, client: reqwest::Client) -> Self {
    self.palette_client = Some(client);
    self
  }

  pub fn dom(&self) -> &D {
    &self.dom
  }

  pub fn dom_mut(&mut self) -> &mut D {
    &mut self.dom
  }

  pub fn kind(&self) -> PageKind {
    self.kind
  }

  pub fn session(&self) -> &MonitoringSession {
    &self.session
  }

  pub fn presenter(&self) -> &OverlayPresenter {
    &self.presenter
  }

  pub fn auth(&self) -> &AuthLifecycle<S, T> {
    &self.auth
  }

  pub fn lookup(&self) -> &L {
    &self.lookup
  }

  /// Confirms the stored token and schedules monitoring when it holds.
  pub async fn startup(&mut self) {
    info!("page controller started for {:?}", self.kind);
    if !self.kind.is_supported() {
      return;
    }
    if self.auth.access_token().is_none() {
      info!("no token stored, waiting for authorization");
      return;
    }

    match self.auth.ensure_valid().await {
      AuthPhase::Authenticated => {
        info!("valid token found, starting monitoring");
        self.timers.start = Some(Instant::now() + self.timings.start_delay);
      }
      phase => info!("no valid token ({:?}), waiting for authorization", phase),
    }
  }

  pub fn start_monitoring(&mut self) {
    if self.session.is_active() {
      debug!("already monitoring, forcing a fresh evaluation");
      self.timers.evaluate = Some(Instant::now() + self.timings.restart_check);
      return;
    }

    info!("starting track monitoring");
    self.session.start();
    self.try_attach();
  }

  fn try_attach(&mut self) {
    match ObserverHandle::attach(&self.dom, self.kind, self.timings.debounce) {
      Some(observer) => {
        debug!("observer set up");
        self.session.attach(observer);
        self.timers.attach = None;
        self.timers.evaluate = Some(Instant::now() + self.timings.initial_check);
      }
      None => {
        debug!(
          "mount point not found, retrying in {} ms",
          self.timings.attach_retry.as_millis()
        );
        self.timers.attach = Some(Instant::now() + self.timings.attach_retry);
      }
    }
  }

  pub fn stop_monitoring(&mut self) {
    if self.session.is_active() {
      info!("stopping track monitoring");
    }
    self.session.stop();
    self.timers.attach = None;
    self.timers.evaluate = None;
  }

  /// Stops everything and hands the page back its video.
  pub fn teardown(&mut self) {
    self.stop_monitoring();
    self.timers.clear_session_timers();
    self.presenter.show_native(&mut self.dom, self.kind);
    self.session.reset_identity();
    self.resolver.forget();
    self.refreshed_for = None;
  }

  pub fn on_mutations(&mut self, mutations: &[Mutation]) {
    if !self.session.is_active() {
      return;
    }
    let detached = self
      .session
      .observer()
      .is_some_and(|observer| !observer.is_attached(&self.dom));
    if detached {
      debug!("observed subtree was replaced, re-attaching");
      self.try_attach();
    }
    if let Some(observer) = self.session.observer() {
      observer.offer(&self.dom, mutations);
    }
  }

  /// Reads the page and moves the overlay towards what it shows. Lookups
  /// are issued here but complete later, in [`Self::on_artwork`].
  pub fn evaluate(&mut self) {
    if !self.session.is_active() {
      return;
    }

    if !is_eligible_for_artwork(&self.dom, self.kind) {
      debug!("not music content, showing video");
      self.presenter.show_native(&mut self.dom, self.kind);
      self.session.reset_identity();
      return;
    }

    let identity = extract_identity(&self.dom, self.kind);
    if !self.session.record(&identity) {
      debug!("same track as before, skipping update");
      return;
    }
    info!("track changed: {}", identity);

    match self.resolver.begin(&identity) {
      Resolution::Skip => {
        debug!("missing track info, showing video");
        self.presenter.show_native(&mut self.dom, self.kind);
      }
      Resolution::Cached(url) => self.present(&identity, url.as_deref()),
      Resolution::InFlight => debug!("lookup for {} already running", identity),
      Resolution::Fetch(request) => {
        let lookup = Rc::clone(&self.lookup);
        self
          .fetches
          .push(Box::pin(async move { request.run(lookup.as_ref()).await }));
      }
    }
  }

  fn present(&mut self, identity: &TrackIdentity, artwork: Option<&str>) {
    let eligible = is_eligible_for_artwork(&self.dom, self.kind);
    let target = decide(eligible, identity, artwork);
    let new_url = match &target {
      Target::Artwork(url) if self.presenter.showing_url() != Some(url.as_str()) => Some(url.clone()),
      _ => None,
    };
    self.presenter.apply(&mut self.dom, self.kind, &target);
    if let Some(url) = new_url {
      if self.presenter.showing_url() == Some(url.as_str()) {
        self.request_palette(url);
      }
    }
  }

  #[cfg(feature = "palette")]
  fn request_palette(&mut self, url: String) {
    if self.kind != PageKind::VideoPage {
      return;
    }
    let Some(client) = self.palette_client.clone() else {
      return;
    };
    self.palettes.push(Box::pin(async move {
      match crate::palette::fetch_palette(&client, &url).await {
        Ok(palette) => (url, Some(palette)),
        Err(e) => {
          warn!("could not read artwork colours: {}", e);
          (url, None)
        }
      }
    }));
  }

  #[cfg(not(feature = "palette"))]
  fn request_palette(&mut self, _url: String) {}

  /// A lookup finished. Results for a stopped session or for an identity
  /// the page has moved on from are dropped.
  pub async fn on_artwork(&mut self, outcome: ArtworkOutcome) {
    self.resolver.complete(&outcome);
    if !self.session.is_active() {
      debug!("session stopped, dropping artwork for {}", outcome.identity);
      return;
    }
    if *self.session.last_identity() != outcome.identity {
      debug!("dropping stale artwork for {}", outcome.identity);
      return;
    }

    match outcome.result {
      LookupResult::Unauthorized => self.recover_authorization(outcome.identity).await,
      result => {
        self.refreshed_for = None;
        self.present(&outcome.identity, result.url());
      }
    }
  }

  async fn recover_authorization(&mut self, identity: TrackIdentity) {
    if self.refreshed_for.as_ref() == Some(&identity) {
      warn!("lookup still unauthorized after a refresh, showing video");
      self.presenter.show_native(&mut self.dom, self.kind);
      return;
    }

    self.auth.mark_expired();
    match self.auth.refresh().await {
      AuthPhase::Authenticated => {
        self.refreshed_for = Some(identity);
        self.session.reset_identity();
        self.evaluate();
      }
      phase => {
        warn!("token refresh left us {:?}, stopping", phase);
        self.teardown();
      }
    }
  }

  pub fn on_palette(&mut self, url: &str, palette: Option<&Palette>) {
    if self.session.is_active() {
      self.presenter.apply_palette(&mut self.dom, url, palette);
    }
  }

  /// Compares the page address with the last one seen and resets the page
  /// when it moved.
  pub fn on_navigation(&mut self) {
    let location = self.dom.location();
    if self.navigation.check(&location).is_none() {
      return;
    }

    self.session.reset_identity();
    self.presenter.show_native(&mut self.dom, self.kind);
    self.timers.evaluate = None;
    if self.session.is_active() {
      self.timers.restart = Some(Instant::now() + self.timings.navigation_settle);
    }
  }

  pub fn on_visibility(&mut self, visible: bool) {
    if visible && self.session.is_active() {
      debug!("tab became visible, checking track info");
      self.evaluate();
    }
  }

  pub fn on_storage(&mut self, change: &StorageChange) {
    if change.key != keys::ACCESS_TOKEN {
      return;
    }
    if change.was_removed() {
      info!("access token removed, cleaning up");
      self.teardown();
    } else if change.was_added() {
      info!("access token added, starting monitoring shortly");
      self.timers.start = Some(Instant::now() + self.timings.token_added_delay);
    }
  }

  pub async fn handle_message(&mut self, message: TabMessage) -> MessageReply {
    debug!("page received {:?}", message);
    match message {
      TabMessage::ProcessAuthCode { code } => match self.auth.complete_authorization(&code).await {
        AuthPhase::Authenticated => {
          self.start_monitoring();
          MessageReply::ok()
        }
        phase => MessageReply::failed(format!("authorization failed ({:?})", phase)),
      },
      TabMessage::ManualAuthTrigger => match self.auth.begin_authorization() {
        Some(url) => match self.rpc.notify(BackgroundRequest::OpenAuthTab { url }) {
          Ok(()) => MessageReply::ok(),
          Err(e) => MessageReply::failed(e.to_string()),
        },
        None => MessageReply::failed("authorization could not be started"),
      },
      TabMessage::AuthorizationComplete => {
        info!("authorization completed, starting monitoring");
        self.start_monitoring();
        MessageReply::ok()
      }
      TabMessage::ExtensionDisconnected => {
        info!("extension disconnected, cleaning up");
        self.teardown();
        MessageReply::ok()
      }
    }
  }

  /// Logs what overlay nodes exist and forces a full cleanup.
  pub fn debug_cleanup(&mut self) -> (OverlayReport, OverlayReport) {
    let before = OverlayReport::read(&self.dom);
    info!(
      "cleanup requested on {}: {:?}, music content: {}",
      self.dom.location(),
      before,
      is_eligible_for_artwork(&self.dom, self.kind)
    );
    self.presenter.show_native(&mut self.dom, self.kind);
    let after = OverlayReport::read(&self.dom);
    info!("after cleanup: {:?}", after);
    (before, after)
  }

  fn on_timer(&mut self, timer: Timer) {
    match timer {
      Timer::Start => {
        self.timers.start = None;
        self.start_monitoring();
      }
      Timer::Attach => {
        self.timers.attach = None;
        if self.session.is_active() {
          self.try_attach();
        }
      }
      Timer::Evaluate => {
        self.timers.evaluate = None;
        self.session.reset_identity();
        self.evaluate();
      }
      Timer::Restart => {
        self.timers.restart = None;
        if self.session.is_active() {
          self.stop_monitoring();
          self.start_monitoring();
        }
      }
      Timer::Poll => {
        self.timers.poll = Instant::now() + self.timings.navigation_poll;
        self.on_navigation();
      }
    }
  }

  async fn handle_event(&mut self, event: PageEvent) -> bool {
    match event {
      PageEvent::Mutations(mutations) => self.on_mutations(&mutations),
      PageEvent::Navigated => self.on_navigation(),
      PageEvent::VisibilityChanged { visible } => self.on_visibility(visible),
      PageEvent::Storage(change) => self.on_storage(&change),
      PageEvent::Message { message, reply } => {
        let response = self.handle_message(message).await;
        if let Some(reply) = reply {
          if reply.send(response).is_err() {
            debug!("message sender went away before the reply");
          }
        }
      }
      PageEvent::Unload => {
        self.stop_monitoring();
        return false;
      }
    }
    true
  }

  /// Waits for the next thing to happen and handles it. `false` once the
  /// page is gone.
  pub async fn step(&mut self, events: &mut mpsc::UnboundedReceiver<PageEvent>) -> bool {
    let wake = tokio::select! {
      event = events.recv() => Wake::Event(event),
      Ok(change) = self.storage.recv() => Wake::Storage(change),
      Some(change) = next_change(self.session.observer.as_mut()) => Wake::Change(change),
      Some(outcome) = self.fetches.next(), if !self.fetches.is_empty() => Wake::Artwork(outcome),
      Some((url, palette)) = self.palettes.next(), if !self.palettes.is_empty() => {
        Wake::Palette(url, palette)
      }
      timer = next_timer(&self.timers) => Wake::Timer(timer),
    };

    match wake {
      Wake::Event(None) => {
        self.stop_monitoring();
        false
      }
      Wake::Event(Some(event)) => self.handle_event(event).await,
      Wake::Storage(change) => {
        self.on_storage(&change);
        true
      }
      Wake::Change(change) => {
        debug!("re-evaluating after {} mutation batches", change.coalesced);
        self.evaluate();
        true
      }
      Wake::Artwork(outcome) => {
        self.on_artwork(outcome).await;
        true
      }
      Wake::Palette(url, palette) => {
        self.on_palette(&url, palette.as_ref());
        true
      }
      Wake::Timer(timer) => {
        self.on_timer(timer);
        true
      }
    }
  }

  pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<PageEvent>) {
    self.startup().await;
    while self.step(&mut events).await {}
    info!("page controller stopped");
  }

  /// Evaluates the page once, waits for the lookup and the artwork palette,
  /// and reports the result.
  pub async fn inspect(&mut self) -> InspectReport {
    self.session.start();
    self.evaluate();
    while let Some(outcome) = self.fetches.next().await {
      self.on_artwork(outcome).await;
    }
    while let Some((url, palette)) = self.palettes.next().await {
      self.on_palette(&url, palette.as_ref());
    }
    InspectReport {
      kind: self.kind,
      eligible: is_eligible_for_artwork(&self.dom, self.kind),
      identity: self.session.last_identity().clone(),
      state: self.presenter.state().clone(),
      overlay: OverlayReport::read(&self.dom),
    }
  }
}
