use orderbridge_core::events::{status, ChangeEvent, ChangeType, Notification};

/// A filter rule deciding whether a change event is worth telling sessions about.
pub trait EventRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn matches(&self, event: &ChangeEvent) -> bool;
}

/// An order moved to "Submitted to Manufacturing".
#[derive(Clone, Copy, Debug, Default)]
pub struct SubmittedToManufacturing;

impl EventRule for SubmittedToManufacturing {
    fn name(&self) -> &'static str {
        "submitted_to_manufacturing"
    }

    fn matches(&self, event: &ChangeEvent) -> bool {
        event.change_type() == ChangeType::Update
            && event.status() == Some(status::SUBMITTED_TO_MANUFACTURING)
    }
}

/// Ordered rule set. An event becomes a notification when any rule matches.
pub struct Translator {
    rules: Vec<Box<dyn EventRule>>,
}

impl Translator {
    pub fn new(rules: Vec<Box<dyn EventRule>>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, rule: impl EventRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn translate(&self, event: &ChangeEvent) -> Option<Notification> {
        self.rules
            .iter()
            .any(|rule| rule.matches(event))
            .then(|| Notification {
                record_ids: event.record_ids().to_vec(),
            })
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(vec![Box::new(SubmittedToManufacturing)])
    }
}

/// Translate with the default rule set.
pub fn translate(event: &ChangeEvent) -> Option<Notification> {
    SubmittedToManufacturing.matches(event).then(|| Notification {
        record_ids: event.record_ids().to_vec(),
    })
}
