//! Application state shared by the front end. All changes go through
//! [`AppStore::dispatch`]; everything else reads snapshots or subscribes.

use shared::domain::ObjectId;
use tokio::sync::watch;
use tracing::debug;

use crate::errors::UserFacingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Notebook,
    Market,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modal {
    TaskDetail(ObjectId),
    IdeaDetail(ObjectId),
    PostTask,
    PublishIdea,
    Login,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppState {
    pub mode: Mode,
    pub page: usize,
    pub page_count: usize,
    pub modal: Option<Modal>,
    pub selected_task: Option<ObjectId>,
    pub selected_idea: Option<ObjectId>,
    pub busy: bool,
    pub last_error: Option<UserFacingError>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            mode: Mode::Notebook,
            page: 0,
            page_count: 1,
            modal: None,
            selected_task: None,
            selected_idea: None,
            busy: false,
            last_error: None,
        }
    }
}

impl AppState {
    fn last_page(&self) -> usize {
        self.page_count.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SetMode(Mode),
    SetPageCount(usize),
    NextPage,
    PreviousPage,
    GoToPage(usize),
    OpenModal(Modal),
    CloseModal,
    SelectTask(Option<ObjectId>),
    SelectIdea(Option<ObjectId>),
    FlowStarted,
    FlowFinished,
    FlowFailed(UserFacingError),
    DismissError,
}

/// Applies `action` to `state`. Page numbers are always kept within
/// `0..page_count`.
pub fn reduce(state: &mut AppState, action: Action) {
    match action {
        Action::SetMode(mode) => {
            if state.mode != mode {
                state.mode = mode;
                state.page = 0;
                state.modal = None;
            }
        }
        Action::SetPageCount(count) => {
            state.page_count = count.max(1);
            state.page = state.page.min(state.last_page());
        }
        Action::NextPage => state.page = (state.page + 1).min(state.last_page()),
        Action::PreviousPage => state.page = state.page.saturating_sub(1),
        Action::GoToPage(page) => state.page = page.min(state.last_page()),
        Action::OpenModal(modal) => {
            match &modal {
                Modal::TaskDetail(id) => state.selected_task = Some(id.clone()),
                Modal::IdeaDetail(id) => state.selected_idea = Some(id.clone()),
                Modal::PostTask | Modal::PublishIdea | Modal::Login => {}
            }
            state.modal = Some(modal);
        }
        Action::CloseModal => state.modal = None,
        Action::SelectTask(id) => state.selected_task = id,
        Action::SelectIdea(id) => state.selected_idea = id,
        Action::FlowStarted => {
            state.busy = true;
            state.last_error = None;
        }
        Action::FlowFinished => state.busy = false,
        Action::FlowFailed(err) => {
            state.busy = false;
            if err.requires_reauth() {
                state.modal = Some(Modal::Login);
            }
            state.last_error = Some(err);
        }
        Action::DismissError => state.last_error = None,
    }
}

/// Single-writer store. Readers hold `watch` receivers and see every
/// committed state.
pub struct AppStore {
    tx: watch::Sender<AppState>,
}

impl Default for AppStore {
    fn default() -> Self {
        Self::new(AppState::default())
    }
}

impl AppStore {
    pub fn new(initial: AppState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn dispatch(&self, action: Action) {
        debug!(?action, "state: dispatch");
        self.tx.send_modify(|state| reduce(state, action));
    }

    pub fn snapshot(&self) -> AppState {
        self.tx.borrow().clone()
    }

    pub fn select<T>(&self, selector: impl FnOnce(&AppState) -> T) -> T {
        selector(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/app_state_tests.rs"]
mod tests;
