use super::*;

#[test]
fn parse_registry_name() {
    assert!(RegistryName::parse("gcr.io").is_ok());
    assert!(RegistryName::parse("gcr.io/prod-artifacts").is_ok());
    assert!(RegistryName::parse("gcr.io/prod/artifacts").is_ok());
    assert!(RegistryName::parse("localhost").is_ok());
    assert!(RegistryName::parse("localhost:5000").is_ok());
    assert!(RegistryName::parse("localhost:5000/mirror").is_ok());
    assert!(RegistryName::parse("").is_err());
    assert!(RegistryName::parse("gcr.io/").is_err());
    assert!(RegistryName::parse("/gcr.io").is_err());
    assert!(RegistryName::parse("gcr.io//prod").is_err());
    assert!(RegistryName::parse("gcr.io/Prod").is_err());
    assert!(RegistryName::parse("gcr.io:").is_err());
    assert!(RegistryName::parse("gcr.io:port").is_err());
    assert!(RegistryName::parse(" gcr.io").is_err());
    assert!(RegistryName::parse("gcr.io ").is_err());
    assert!(RegistryName::parse("-gcr.io").is_err());

    let r = RegistryName::parse("us.gcr.io/prod-artifacts").unwrap();
    assert_eq!(r.host_str(), "us.gcr.io");
    assert_eq!(r.port(), None);
    assert_eq!(r.prefix_str(), Some("prod-artifacts"));
    assert!(r.is_https());
    assert_eq!(r.api_base(), "https://us.gcr.io");

    let r = RegistryName::parse("localhost:5000").unwrap();
    assert_eq!(r.host_str(), "localhost");
    assert_eq!(r.port(), Some(5000));
    assert_eq!(r.prefix_str(), None);
    assert!(!r.is_https());
    assert_eq!(r.api_base(), "http://localhost:5000");
}

#[test]
fn registry_repository_paths() {
    let r = RegistryName::parse("gcr.io/prod").unwrap();
    let image = ImageName::parse("apps/frontend").unwrap();
    assert_eq!(r.repository_path(&image), "prod/apps/frontend");
    assert_eq!(
        r.relative_image("prod/apps/frontend"),
        Some("apps/frontend".parse().unwrap())
    );
    assert_eq!(r.relative_image("other/apps/frontend"), None);
    assert_eq!(r.relative_image("prod"), None);

    let bare = RegistryName::parse("localhost:5000").unwrap();
    assert_eq!(bare.repository_path(&image), "apps/frontend");
    assert_eq!(
        bare.relative_image("apps/frontend"),
        Some("apps/frontend".parse().unwrap())
    );
}

#[test]
fn parse_image_name() {
    assert!(ImageName::parse("").is_err());
    assert!(ImageName::parse("/").is_err());
    assert!(ImageName::parse("blah").is_ok());
    assert!(ImageName::parse("blah.ok").is_ok());
    assert!(ImageName::parse("blah..ok").is_err());
    assert!(ImageName::parse(".ok").is_err());
    assert!(ImageName::parse("blah/blah.ok").is_ok());
    assert!(ImageName::parse("blah/blah..ok").is_err());
    assert!(ImageName::parse("blah/.ok").is_err());
    assert!(ImageName::parse("/blah").is_err());
    assert!(ImageName::parse("blah/").is_err());
    assert!(ImageName::parse("blah//blah").is_err());
    assert!(ImageName::parse("b-a-l-l-s").is_ok());
    assert!(ImageName::parse("-balls").is_err());
    assert!(ImageName::parse("b--alls").is_ok());
    assert!(ImageName::parse("Blah").is_err());
    assert!(ImageName::parse(" blah").is_err());
    assert!(ImageName::parse("blah ").is_err());
    assert!(ImageName::parse("a").is_ok());

    let n = ImageName::parse("apps/web/frontend").unwrap();
    let parts: Vec<&str> = n.iter().collect();
    assert_eq!(parts, vec!["apps", "web", "frontend"]);
    assert_eq!(
        ImageName::parse("apps").unwrap().join(&"web".parse().unwrap()),
        "apps/web".parse().unwrap()
    );
}

#[test]
fn parse_digest() {
    assert!(ContentDigest::parse("balls").is_err());
    assert!(ContentDigest::parse("balls:0123456789abcdef0123456789abcdef").is_ok());
    assert!(ContentDigest::parse("-balls:0123456789abcdef0123456789abcdef").is_err());
    assert!(
        ContentDigest::parse("b_b+b+b+b.balllllls:0123456789abcdef0123456789abcdef").is_ok()
    );
    assert!(
        ContentDigest::parse("b_b+b++b.balllllls:0123456789abcdef0123456789abcdef").is_err()
    );
    assert!(ContentDigest::parse("balls:0123456789abcdef0123456789abcdeg").is_err());
    assert!(ContentDigest::parse("balls:0123456789ABCDEF0123456789abcdef").is_err());
    assert!(ContentDigest::parse("0123456789abcdef0123456789abcdef").is_err());
    assert!(ContentDigest::parse(":0123456789abcdef0123456789abcdef").is_err());
    assert!(ContentDigest::parse("balls:0123456789abcdef0123456789abcde").is_err());
    assert!(ContentDigest::parse("b9:0123456789abcdef0123456789abcdef").is_ok());
    assert!(ContentDigest::parse(" balls:0123456789abcdef0123456789abcdef").is_err());
    assert!(ContentDigest::parse("balls:0123456789abcdef0123456789abcdef ").is_err());

    let d = ContentDigest::parse(
        "sha256:e06f93f59fe842fb490ba992bae19fdd5a05373547b52f8184650c2509908114",
    )
    .unwrap();
    assert_eq!(d.algorithm_str(), "sha256");
    assert_eq!(
        d.hex_str(),
        "e06f93f59fe842fb490ba992bae19fdd5a05373547b52f8184650c2509908114"
    );
}

#[test]
fn digest_from_content() {
    let d = ContentDigest::from_content(b"");
    assert_eq!(
        d.as_str(),
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn parse_tag() {
    assert!(Tag::parse("").is_err());
    assert!(Tag::parse("v1.0.0").is_ok());
    assert!(Tag::parse("latest").is_ok());
    assert!(Tag::parse("1.21-alpine").is_ok());
    assert!(Tag::parse("-oops").is_err());
    assert!(Tag::parse(".oops").is_err());
    assert!(Tag::parse("_fine").is_ok());
    assert!(Tag::parse("has space").is_err());
    assert!(Tag::parse("has/slash").is_err());
    assert!(Tag::parse(&"t".repeat(128)).is_ok());
    assert!(Tag::parse(&"t".repeat(129)).is_err());
}

#[test]
fn reference_ordering() {
    let a = ContentDigest::parse("sha256:0123456789abcdef0123456789abcdef").unwrap();
    let b = ContentDigest::parse("sha256:1123456789abcdef0123456789abcdef").unwrap();
    assert!(a < b);
    assert_eq!(a.clone(), a);

    let t1: Tag = "v1".parse().unwrap();
    let t2: Tag = "v2".parse().unwrap();
    assert!(t1 < t2);
}

#[test]
fn reference_serde_round_trip() {
    let registry: RegistryName = serde_yaml::from_str("gcr.io/prod").unwrap();
    assert_eq!(registry, "gcr.io/prod".parse().unwrap());
    assert!(serde_yaml::from_str::<RegistryName>("\"not a registry\"").is_err());

    let yaml = serde_yaml::to_string(&registry).unwrap();
    let back: RegistryName = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(back, registry);

    let tag: Tag = serde_yaml::from_str("v1.0.0").unwrap();
    assert_eq!(tag, "v1.0.0".parse().unwrap());
}
