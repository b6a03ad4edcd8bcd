use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use crate::core::drive::{DriveService, Replacement, TemplateRequest};
use crate::core::folders::{self, DirectoryTree};
use crate::infra::google::{parse_file_list, GoogleAuth, GoogleDocsClient, GoogleDriveClient};

type GoogleDriveService = DriveService<GoogleDriveClient, GoogleDocsClient>;

/// Create Google Docs from templates and keep Drive folders in order.
#[derive(Debug, Parser)]
#[command(name = "drive-templater", version, about, long_about = None)]
pub struct Cli {
    /// Authorized user token file (overrides GOOGLE_TOKEN_FILE and service account settings)
    #[arg(long, global = true)]
    pub token_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print every folder path you own with its id, or look up a single folder
    Folders {
        /// Print only the id of this folder path
        #[arg(long, conflicts_with = "id")]
        path: Option<String>,
        /// Print only the path of this folder id
        #[arg(long)]
        id: Option<String>,
    },
    /// Resolve a saved `files.list` reply offline, inferring the root
    Resolve {
        /// JSON file with a `files` array of {id, name, parents}
        listing: PathBuf,
    },
    /// Create a folder; with -p create every missing folder along the path
    Mkdir {
        /// Full folder path, e.g. /Clients/ACME
        path: String,
        /// Create missing parent folders too
        #[arg(short, long)]
        parents: bool,
    },
    /// Copy a file, optionally into a folder
    Copy {
        /// Template file id or URL
        #[arg(long)]
        template: String,
        /// Name of the new file
        #[arg(long)]
        name: String,
        /// Folder path for the copy (created if missing)
        #[arg(long)]
        folder: Option<String>,
    },
    /// Give a user read access to a file
    Share {
        /// File id or URL
        #[arg(long)]
        file: String,
        /// Email address of the reader
        #[arg(long)]
        user: String,
    },
    /// Copy a template, replace its tokens and optionally share the result
    Generate {
        /// Template document id or URL
        #[arg(long)]
        template: String,
        /// Name of the new document
        #[arg(long)]
        name: String,
        /// Folder path for the document (defaults to the drive root)
        #[arg(long)]
        folder: Option<String>,
        /// TOKEN=VALUE pair, may be repeated
        #[arg(long = "replace", value_parser = parse_replacement)]
        replacements: Vec<Replacement>,
        /// Email address to share the finished document with
        #[arg(long)]
        share: Option<String>,
    },
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Command::Resolve { listing } => {
                let text = tokio::fs::read_to_string(listing)
                    .await
                    .with_context(|| format!("Cannot read {}", listing.display()))?;
                let records = parse_file_list(&text)
                    .with_context(|| format!("{} is not a files.list reply", listing.display()))?;
                print_tree(&folders::resolve(&records)?);
            }
            Command::Folders { path, id } => {
                let tree = self.service().await?.folders().await?;
                match (path, id) {
                    (Some(path), _) => {
                        let id = tree
                            .id_for(path)
                            .ok_or_else(|| anyhow!("No folder at {}", path))?;
                        println!("{}", id);
                    }
                    (None, Some(id)) => {
                        let path = tree
                            .path_for(id)
                            .ok_or_else(|| anyhow!("No folder with id {}", id))?;
                        println!("{}", path);
                    }
                    (None, None) => print_tree(&tree),
                }
            }
            Command::Mkdir { path, parents } => {
                let service = self.service().await?;
                let id = if *parents {
                    service.ensure_folder(path).await?
                } else {
                    let (parent, name) = split_parent(path)?;
                    service.create_folder(name, parent).await?
                };
                println!("{}", id);
            }
            Command::Copy {
                template,
                name,
                folder,
            } => {
                let template_id = file_id(template)?;
                let id = self
                    .service()
                    .await?
                    .copy_file(&template_id, name, folder.as_deref())
                    .await?;
                println!("{}", id);
            }
            Command::Share { file, user } => {
                let link = self.service().await?.share_file(&file_id(file)?, user).await?;
                println!("{}", link);
            }
            Command::Generate {
                template,
                name,
                folder,
                replacements,
                share,
            } => {
                let request = TemplateRequest {
                    template_id: file_id(template)?,
                    new_file_name: name.clone(),
                    replacements: replacements.clone(),
                    folder: folder.clone(),
                    share_with: share.clone(),
                };

                let generated = self
                    .service()
                    .await?
                    .generate_from_template(&request)
                    .await?;

                println!("document: {}", generated.document_id);
                println!("occurrences changed: {}", generated.occurrences_changed);
                if let Some(link) = generated.share_link {
                    println!("shared: {}", link);
                }
            }
        }

        Ok(())
    }

    async fn service(&self) -> Result<GoogleDriveService> {
        let auth = Arc::new(
            GoogleAuth::from_env(self.token_file.as_deref())
                .await
                .context("Failed to load Google credentials")?,
        );

        Ok(DriveService::new(
            GoogleDriveClient::new(auth.clone()),
            GoogleDocsClient::new(auth),
        ))
    }
}

fn print_tree(tree: &DirectoryTree) {
    for (path, id) in tree.iter() {
        println!("{}\t{}", path, id);
    }
}

fn file_id(url_or_id: &str) -> Result<String> {
    GoogleDocsClient::extract_doc_id(url_or_id)
        .ok_or_else(|| anyhow!("Could not extract a file id from: {}", url_or_id))
}

/// `/Docs/New` -> (`/Docs`, `New`); `/New` -> (`/`, `New`).
fn split_parent(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, name)) if !name.is_empty() => {
            Ok((if parent.is_empty() { "/" } else { parent }, name))
        }
        _ => Err(anyhow!("Not a folder path: {}", path)),
    }
}

/// Parse `TOKEN=VALUE`. Only the first `=` splits, so values may contain `=`.
fn parse_replacement(raw: &str) -> Result<Replacement, String> {
    let (token, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TOKEN=VALUE, got '{}'", raw))?;
    if token.is_empty() {
        return Err(format!("empty token in '{}'", raw));
    }
    Ok(Replacement::new(token, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_pairs() {
        assert_eq!(
            parse_replacement("{{name}}=Ada").unwrap(),
            Replacement::new("{{name}}", "Ada")
        );
        assert_eq!(
            parse_replacement("{{sum}}=a=b").unwrap(),
            Replacement::new("{{sum}}", "a=b")
        );
        assert_eq!(
            parse_replacement("{{blank}}=").unwrap(),
            Replacement::new("{{blank}}", "")
        );
        assert!(parse_replacement("novalue").is_err());
        assert!(parse_replacement("=x").is_err());
    }

    #[test]
    fn generate_arguments() {
        let cli = Cli::try_parse_from([
            "drive-templater",
            "generate",
            "--template",
            "https://docs.google.com/document/d/tmpl123/edit",
            "--name",
            "Invoice 42",
            "--folder",
            "/Invoices/2024",
            "--replace",
            "{{number}}=42",
            "--replace",
            "{{customer}}=ACME",
            "--share",
            "ada@example.com",
        ])
        .unwrap();

        match cli.command {
            Command::Generate {
                template,
                folder,
                replacements,
                share,
                ..
            } => {
                assert_eq!(file_id(&template).unwrap(), "tmpl123");
                assert_eq!(folder.as_deref(), Some("/Invoices/2024"));
                assert_eq!(replacements.len(), 2);
                assert_eq!(replacements[1], Replacement::new("{{customer}}", "ACME"));
                assert_eq!(share.as_deref(), Some("ada@example.com"));
            }
            other => panic!("parsed wrong command: {:?}", other),
        }
    }

    #[test]
    fn mkdir_splits_parent_and_name() {
        assert_eq!(split_parent("/Docs/New").unwrap(), ("/Docs", "New"));
        assert_eq!(split_parent("/New/").unwrap(), ("/", "New"));
        assert!(split_parent("/").is_err());
        assert!(split_parent("New").is_err());

        let cli = Cli::try_parse_from(["drive-templater", "mkdir", "-p", "/a/b"]).unwrap();
        assert!(matches!(cli.command, Command::Mkdir { parents: true, .. }));
    }

    #[test]
    fn folders_path_and_id_conflict() {
        let result = Cli::try_parse_from([
            "drive-templater",
            "folders",
            "--path",
            "/Docs",
            "--id",
            "1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn token_file_is_global() {
        let cli =
            Cli::try_parse_from(["drive-templater", "mkdir", "/Docs", "--token-file", "me.json"])
                .unwrap();
        assert_eq!(cli.token_file, Some(PathBuf::from("me.json")));
    }

    #[tokio::test]
    async fn resolve_reads_saved_listing() {
        use std::io::Write;

        let mut listing = tempfile::NamedTempFile::new().unwrap();
        write!(
            listing,
            r#"{{"files": [
                {{"id": "2", "name": "Templates", "parents": ["1"]}},
                {{"id": "1", "name": "Docs", "parents": ["root"]}}
            ]}}"#
        )
        .unwrap();

        let cli = Cli {
            token_file: None,
            command: Command::Resolve {
                listing: listing.path().to_path_buf(),
            },
        };
        cli.execute().await.unwrap();
    }
}
