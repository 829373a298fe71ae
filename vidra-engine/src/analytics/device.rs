//! Device and viewport enrichment

use std::collections::BTreeMap;

use serde_json::Value;

use crate::page::Page;

/// Coarse device class derived from the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeviceClass::Mobile => "mobile",
            DeviceClass::Tablet => "tablet",
            DeviceClass::Desktop => "desktop",
        };
        write!(f, "{label}")
    }
}

/// Classify a user agent string. Mobile markers are checked before tablet
/// markers, matching the reporting convention the dashboards expect.
pub fn device_class(user_agent: &str) -> DeviceClass {
    let ua = user_agent.to_lowercase();
    if ["mobile", "android", "iphone", "phone"]
        .iter()
        .any(|m| ua.contains(m))
    {
        return DeviceClass::Mobile;
    }
    if ["tablet", "ipad"].iter().any(|m| ua.contains(m)) {
        return DeviceClass::Tablet;
    }
    DeviceClass::Desktop
}

/// Context fields attached to every analytics event
pub fn context_fields(page: &dyn Page) -> BTreeMap<String, Value> {
    let viewport = page.viewport();
    let mut fields = BTreeMap::new();
    fields.insert("viewport_width".to_string(), Value::from(viewport.width));
    fields.insert("viewport_height".to_string(), Value::from(viewport.height));
    fields.insert(
        "device_type".to_string(),
        Value::from(device_class(&page.user_agent()).to_string()),
    );
    fields.insert(
        "is_touch_device".to_string(),
        Value::from(page.touch_capable()),
    );
    fields
}
