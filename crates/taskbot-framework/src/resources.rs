//! Values injected into the [`Context`](crate::Context) by the standard
//! middlewares.

use std::collections::HashSet;
use std::sync::Arc;

use taskbot_core::{ActivityStore, BoxedTranslator, UserId, UserStore};

/// Long-lived collaborators shared by every dispatch cycle.
#[derive(Clone)]
pub struct SharedResources {
    pub users: Arc<dyn UserStore>,
    pub activity: Arc<dyn ActivityStore>,
    pub translator: BoxedTranslator,
    /// Users allowed to run administrative commands.
    pub admin_ids: HashSet<UserId>,
}

impl SharedResources {
    pub fn new(
        users: Arc<dyn UserStore>,
        activity: Arc<dyn ActivityStore>,
        translator: BoxedTranslator,
    ) -> Self {
        Self {
            users,
            activity,
            translator,
            admin_ids: HashSet::new(),
        }
    }

    pub fn with_admins(mut self, ids: impl IntoIterator<Item = UserId>) -> Self {
        self.admin_ids.extend(ids);
        self
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

impl std::fmt::Debug for SharedResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedResources")
            .field("admin_ids", &self.admin_ids)
            .field("default_locale", &self.translator.default_locale())
            .finish_non_exhaustive()
    }
}

/// The locale resolved for the current event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale(pub String);

/// A translator bound to one locale.
#[derive(Clone)]
pub struct I18n {
    locale: String,
    translator: BoxedTranslator,
}

impl I18n {
    pub fn new(locale: impl Into<String>, translator: BoxedTranslator) -> Self {
        Self {
            locale: locale.into(),
            translator,
        }
    }

    /// Translates `key` into the bound locale.
    pub fn t(&self, key: &str) -> String {
        self.translator.translate(&self.locale, key)
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn translator(&self) -> &BoxedTranslator {
        &self.translator
    }
}

impl std::fmt::Debug for I18n {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("I18n")
            .field("locale", &self.locale)
            .finish_non_exhaustive()
    }
}
