use std::fmt;
use std::str::FromStr;

use scriptsync_core::ContentField;
use serde::{Deserialize, Serialize};

/// Value of the `Program Language` marker sent with every script payload.
pub const SCRIPT_LANGUAGE: &str = "JS";
pub const TEMPLATE_EXTENSION: &str = "html";

const WORKSPACE_SEGMENT: &str = "workspace";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    BusinessService,
    BusinessComponent,
    Applet,
    Application,
    WebTemplate,
}

#[derive(Debug)]
pub struct Descriptor {
    /// Folder name in the local mirror.
    pub folder: &'static str,
    pub parent_resource: &'static str,
    /// Script sub-collection; `None` for types whose content sits on the
    /// object itself.
    pub child_resource: Option<&'static str>,
    pub content_field: ContentField,
}

const BUSINESS_SERVICE: Descriptor = Descriptor {
    folder: "service",
    parent_resource: "Business Service",
    child_resource: Some("Business Service Server Script"),
    content_field: ContentField::Script,
};

const BUSINESS_COMPONENT: Descriptor = Descriptor {
    folder: "buscomp",
    parent_resource: "Business Component",
    child_resource: Some("BusComp Server Script"),
    content_field: ContentField::Script,
};

const APPLET: Descriptor = Descriptor {
    folder: "applet",
    parent_resource: "Applet",
    child_resource: Some("Applet Server Script"),
    content_field: ContentField::Script,
};

const APPLICATION: Descriptor = Descriptor {
    folder: "application",
    parent_resource: "Application",
    child_resource: Some("Application Server Script"),
    content_field: ContentField::Script,
};

const WEB_TEMPLATE: Descriptor = Descriptor {
    folder: "webtemplate",
    parent_resource: "Web Template",
    child_resource: None,
    content_field: ContentField::Definition,
};

impl ObjectType {
    pub const ALL: [ObjectType; 5] = [
        ObjectType::BusinessService,
        ObjectType::BusinessComponent,
        ObjectType::Applet,
        ObjectType::Application,
        ObjectType::WebTemplate,
    ];

    pub fn descriptor(self) -> &'static Descriptor {
        match self {
            ObjectType::BusinessService => &BUSINESS_SERVICE,
            ObjectType::BusinessComponent => &BUSINESS_COMPONENT,
            ObjectType::Applet => &APPLET,
            ObjectType::Application => &APPLICATION,
            ObjectType::WebTemplate => &WEB_TEMPLATE,
        }
    }

    pub fn folder(self) -> &'static str {
        self.descriptor().folder
    }

    pub fn from_folder(folder: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.folder() == folder)
    }

    pub fn is_script_bearing(self) -> bool {
        self.descriptor().child_resource.is_some()
    }

    /// File extension of mirror files of this type; scripts use the
    /// configured one.
    pub fn mirror_extension(self, script_ext: &str) -> &str {
        if self.is_script_bearing() {
            script_ext
        } else {
            TEMPLATE_EXTENSION
        }
    }

    pub fn content_field(self) -> ContentField {
        self.descriptor().content_field
    }

    /// `workspace/<ws>/<parent resource>`
    pub fn collection_segments(self, workspace: &str) -> Vec<&str> {
        vec![WORKSPACE_SEGMENT, workspace, self.descriptor().parent_resource]
    }

    /// `workspace/<ws>/<parent resource>/<object>/<child resource>`, or
    /// `None` for types without a script sub-collection.
    pub fn children_segments<'a>(self, workspace: &'a str, object: &'a str) -> Option<Vec<&'a str>> {
        let child = self.descriptor().child_resource?;
        let mut segments = self.collection_segments(workspace);
        segments.extend([object, child]);
        Some(segments)
    }

    /// Resource path of one script or template. Script types need the parent
    /// object name and templates must not have one.
    pub fn leaf_segments<'a>(
        self,
        workspace: &'a str,
        parent: Option<&'a str>,
        leaf: &'a str,
    ) -> Option<Vec<&'a str>> {
        match (self.is_script_bearing(), parent) {
            (true, Some(parent)) => {
                let mut segments = self.children_segments(workspace, parent)?;
                segments.push(leaf);
                Some(segments)
            }
            (false, None) => {
                let mut segments = self.collection_segments(workspace);
                segments.push(leaf);
                Some(segments)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_folder(value).ok_or_else(|| {
            let known: Vec<_> = Self::ALL.iter().map(|ty| ty.folder()).collect();
            format!("unknown object type {value:?}, expected one of {}", known.join(", "))
        })
    }
}
