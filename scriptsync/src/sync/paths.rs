use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::object_type::ObjectType;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("mirror path segment is empty")]
    EmptySegment,
    #[error("mirror path segment is not usable as a file name: {0:?}")]
    UnsupportedSegment(String),
    #[error("{0} entries need a parent object")]
    MissingParent(ObjectType),
    #[error("{0} entries do not take a parent object")]
    UnexpectedParent(ObjectType),
    #[error("path does not match the mirror layout: {0}")]
    Malformed(String),
}

/// Remote coordinates of one mirrored file:
/// `<connection>/<workspace>/<type folder>/[<parent>/]<leaf>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPath {
    pub connection: String,
    pub workspace: String,
    pub object_type: ObjectType,
    pub parent: Option<String>,
    pub leaf: String,
    pub ext: String,
}

impl MirrorPath {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.leaf, self.ext)
    }

    pub fn in_workspace(&self, workspace: &str) -> Self {
        Self {
            workspace: workspace.to_string(),
            ..self.clone()
        }
    }

    pub fn resource_segments(&self) -> Option<Vec<&str>> {
        self.object_type
            .leaf_segments(&self.workspace, self.parent.as_deref(), &self.leaf)
    }
}

pub fn encode(root: &Path, mirror: &MirrorPath) -> Result<PathBuf, PathError> {
    validate_segment(&mirror.leaf)?;
    validate_segment(&mirror.ext)?;
    if mirror.ext.contains('.') {
        return Err(PathError::UnsupportedSegment(mirror.ext.clone()));
    }
    let mut out = object_folder(
        root,
        &mirror.connection,
        &mirror.workspace,
        mirror.object_type,
        mirror.parent.as_deref(),
    )?;
    out.push(mirror.file_name());
    Ok(out)
}

pub fn decode(root: &Path, path: &Path) -> Result<MirrorPath, PathError> {
    let malformed = || PathError::Malformed(path.display().to_string());
    let parts = relative_parts(root, path)?;
    let object_type = parts
        .get(2)
        .and_then(|folder| ObjectType::from_folder(folder))
        .ok_or_else(malformed)?;
    let expected = if object_type.is_script_bearing() { 5 } else { 4 };
    if parts.len() != expected {
        return Err(malformed());
    }

    let file_name = parts[expected - 1];
    let (leaf, ext) = file_name
        .rsplit_once('.')
        .filter(|(leaf, ext)| !leaf.is_empty() && !ext.is_empty())
        .ok_or_else(malformed)?;

    Ok(MirrorPath {
        connection: parts[0].to_string(),
        workspace: parts[1].to_string(),
        object_type,
        parent: object_type
            .is_script_bearing()
            .then(|| parts[3].to_string()),
        leaf: leaf.to_string(),
        ext: ext.to_string(),
    })
}

/// Object folder of a script type: `<connection>/<workspace>/<type>/<parent>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFolder {
    pub connection: String,
    pub workspace: String,
    pub object_type: ObjectType,
    pub parent: String,
}

pub fn decode_folder(root: &Path, folder: &Path) -> Result<ObjectFolder, PathError> {
    let malformed = || PathError::Malformed(folder.display().to_string());
    let parts = relative_parts(root, folder)?;
    let [connection, workspace, type_folder, parent] = parts.as_slice() else {
        return Err(malformed());
    };
    let object_type = ObjectType::from_folder(type_folder)
        .filter(|ty| ty.is_script_bearing())
        .ok_or_else(malformed)?;
    Ok(ObjectFolder {
        connection: connection.to_string(),
        workspace: workspace.to_string(),
        object_type,
        parent: parent.to_string(),
    })
}

fn relative_parts<'a>(root: &Path, path: &'a Path) -> Result<Vec<&'a str>, PathError> {
    let malformed = || PathError::Malformed(path.display().to_string());
    let relative = path.strip_prefix(root).map_err(|_| malformed())?;
    relative
        .components()
        .map(|component| match component {
            Component::Normal(part) => part.to_str().ok_or_else(malformed),
            _ => Err(malformed()),
        })
        .collect()
}

/// Folder holding the files of one object (script types) or of one object
/// type (templates).
pub fn object_folder(
    root: &Path,
    connection: &str,
    workspace: &str,
    object_type: ObjectType,
    parent: Option<&str>,
) -> Result<PathBuf, PathError> {
    validate_segment(connection)?;
    validate_segment(workspace)?;
    let mut out = root.join(connection).join(workspace).join(object_type.folder());
    match (object_type.is_script_bearing(), parent) {
        (true, Some(parent)) => {
            validate_segment(parent)?;
            out.push(parent);
        }
        (true, None) => return Err(PathError::MissingParent(object_type)),
        (false, Some(_)) => return Err(PathError::UnexpectedParent(object_type)),
        (false, None) => {}
    }
    Ok(out)
}

fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::EmptySegment);
    }
    if segment == "." || segment == ".." || segment.contains(['/', '\\']) {
        return Err(PathError::UnsupportedSegment(segment.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(parent: &str, leaf: &str) -> MirrorPath {
        MirrorPath {
            connection: "dev-server".into(),
            workspace: "dev_jdoe_fix".into(),
            object_type: ObjectType::BusinessService,
            parent: Some(parent.into()),
            leaf: leaf.into(),
            ext: "js".into(),
        }
    }

    fn template(leaf: &str) -> MirrorPath {
        MirrorPath {
            connection: "dev-server".into(),
            workspace: "MAIN".into(),
            object_type: ObjectType::WebTemplate,
            parent: None,
            leaf: leaf.into(),
            ext: "html".into(),
        }
    }

    #[test]
    fn encodes_script_under_parent_folder() {
        let root = PathBuf::from("/mirror");
        let mapped = encode(&root, &script("Account Utils", "Service_PreInvokeMethod")).unwrap();
        assert_eq!(
            mapped,
            PathBuf::from(
                "/mirror/dev-server/dev_jdoe_fix/service/Account Utils/Service_PreInvokeMethod.js"
            )
        );
    }

    #[test]
    fn encodes_template_without_parent() {
        let root = PathBuf::from("/mirror");
        let mapped = encode(&root, &template("CCPageContainer")).unwrap();
        assert_eq!(
            mapped,
            PathBuf::from("/mirror/dev-server/MAIN/webtemplate/CCPageContainer.html")
        );
    }

    #[test]
    fn decode_inverts_encode() {
        let root = PathBuf::from("/mirror");
        let samples = vec![
            script("Account Utils", "Service_PreInvokeMethod"),
            script("Utils", "(declarations)"),
            script("Utils", "calc.v2"),
            template("CCPageContainer"),
            template("Dot.Name"),
            MirrorPath {
                object_type: ObjectType::Applet,
                ..script("Account List Applet", "WebApplet_Load")
            },
            MirrorPath {
                object_type: ObjectType::BusinessComponent,
                ext: "ts".into(),
                ..script("Account", "BusComp_PreWriteRecord")
            },
            MirrorPath {
                object_type: ObjectType::Application,
                ..script("Siebel Universal Agent", "Application_Start")
            },
        ];
        for sample in samples {
            let encoded = encode(&root, &sample).unwrap();
            assert_eq!(decode(&root, &encoded).unwrap(), sample);
        }
    }

    #[test]
    fn decode_rejects_short_script_path() {
        let root = PathBuf::from("/mirror");
        let path = root.join("dev-server/MAIN/service/Orphan.js");
        assert!(matches!(decode(&root, &path), Err(PathError::Malformed(_))));
    }

    #[test]
    fn decode_rejects_template_with_parent() {
        let root = PathBuf::from("/mirror");
        let path = root.join("dev-server/MAIN/webtemplate/extra/CCPage.html");
        assert!(matches!(decode(&root, &path), Err(PathError::Malformed(_))));
    }

    #[test]
    fn decode_rejects_unknown_type_folder() {
        let root = PathBuf::from("/mirror");
        let path = root.join("dev-server/MAIN/workflow/Process/Step.js");
        assert!(matches!(decode(&root, &path), Err(PathError::Malformed(_))));
    }

    #[test]
    fn decode_rejects_path_outside_root() {
        let root = PathBuf::from("/mirror");
        let path = PathBuf::from("/elsewhere/dev-server/MAIN/webtemplate/CCPage.html");
        assert!(matches!(decode(&root, &path), Err(PathError::Malformed(_))));
    }

    #[test]
    fn decode_rejects_missing_extension() {
        let root = PathBuf::from("/mirror");
        let path = root.join("dev-server/MAIN/webtemplate/CCPage");
        assert!(matches!(decode(&root, &path), Err(PathError::Malformed(_))));
    }

    #[test]
    fn decodes_object_folder() {
        let root = PathBuf::from("/mirror");
        let folder = root.join("dev-server/MAIN/buscomp/Account");
        assert_eq!(
            decode_folder(&root, &folder).unwrap(),
            ObjectFolder {
                connection: "dev-server".into(),
                workspace: "MAIN".into(),
                object_type: ObjectType::BusinessComponent,
                parent: "Account".into(),
            }
        );
        assert!(decode_folder(&root, &root.join("dev-server/MAIN/webtemplate/x")).is_err());
        assert!(decode_folder(&root, &root.join("dev-server/MAIN/buscomp")).is_err());
    }

    #[test]
    fn encode_rejects_separator_in_name() {
        let root = PathBuf::from("/mirror");
        assert!(matches!(
            encode(&root, &script("a/b", "x")),
            Err(PathError::UnsupportedSegment(_))
        ));
        assert!(matches!(
            encode(&root, &script("..", "x")),
            Err(PathError::UnsupportedSegment(_))
        ));
    }

    #[test]
    fn encode_requires_matching_parent_shape() {
        let root = PathBuf::from("/mirror");
        let orphan = MirrorPath {
            parent: None,
            ..script("x", "y")
        };
        assert_eq!(
            encode(&root, &orphan),
            Err(PathError::MissingParent(ObjectType::BusinessService))
        );
        let nested = MirrorPath {
            parent: Some("x".into()),
            ..template("y")
        };
        assert_eq!(
            encode(&root, &nested),
            Err(PathError::UnexpectedParent(ObjectType::WebTemplate))
        );
    }
}
