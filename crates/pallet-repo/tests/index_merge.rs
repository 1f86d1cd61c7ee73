use pallet_repo::{RepositoryIndex, RepositoryLoader};
use pallet_schema::{Fqdn, RepositoryRef};
use std::fs;
use std::path::PathBuf;

fn write_repo(dir: &std::path::Path, file: &str, digest_14_8: &str) {
    let doc = format!(
        r#"apiVersion: manifests.package-operator.run/v1alpha1
kind: Repository
metadata: {{name: core}}
entries:
  - name: postgres
    image: quay.io/acme/postgres
    digest: "{digest_14_8}"
    versions: ["14.8.0"]
  - name: postgres
    image: quay.io/acme/postgres
    digest: "sha256:p13"
    versions: ["13.12.0"]
"#
    );
    fs::write(dir.join(file), doc).unwrap();
}

fn refs(files: &[&str]) -> Vec<RepositoryRef> {
    files
        .iter()
        .map(|f| RepositoryRef::File(PathBuf::from(f)))
        .collect()
}

#[test]
fn later_repository_overrides_same_version() {
    let dir = tempfile::tempdir().unwrap();
    write_repo(dir.path(), "a.yaml", "sha256:from-a");
    write_repo(dir.path(), "b.yaml", "sha256:from-b");

    let loader = RepositoryLoader::new(dir.path());
    let fqdn = Fqdn::new("postgres", "core");

    let repos = loader.load_all(&refs(&["a.yaml", "b.yaml"])).unwrap();
    let ab = RepositoryIndex::merge(&repos).unwrap();
    let entries = ab.lookup(&fqdn);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].version.to_string(), "14.8.0");
    assert_eq!(entries[1].digest, "sha256:from-b");

    let repos = loader.load_all(&refs(&["b.yaml", "a.yaml"])).unwrap();
    let ba = RepositoryIndex::merge(&repos).unwrap();
    assert_eq!(ba.lookup(&fqdn)[1].digest, "sha256:from-a");
}

#[test]
fn lookup_of_unknown_package_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    write_repo(dir.path(), "a.yaml", "sha256:x");
    let loader = RepositoryLoader::new(dir.path());
    let repos = loader.load_all(&refs(&["a.yaml"])).unwrap();
    let index = RepositoryIndex::merge(&repos).unwrap();
    assert!(index.lookup(&Fqdn::new("redis", "core")).is_empty());
    assert!(index.lookup(&Fqdn::new("postgres", "other")).is_empty());
    assert_eq!(index.packages().count(), 1);
}
