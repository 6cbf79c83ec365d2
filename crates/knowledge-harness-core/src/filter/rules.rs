//! Built-in rule tables for the admission filter.
//!
//! A [`RuleSet`] is plain data. It is built once at start-up (usually via
//! [`RuleSet::builtin`]) and handed to
//! [`AdmissionFilter::new`](super::AdmissionFilter::new), so tests can run
//! several filters side by side with different tables.
//!
//! All name globs are matched case-insensitively. A glob containing `/` is
//! matched against the relative path at any depth; every other glob is
//! matched against the file or directory name.

/// Immutable filter tables.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Credential, key, environment and cloud-config filenames.
    pub sensitive_names: Vec<String>,
    /// Regular expressions for secrets embedded in file content.
    pub sensitive_content: Vec<String>,
    /// Directories excluded by every preset that prunes directories.
    pub standard_dirs: Vec<String>,
    /// Extra directories excluded by presets with aggressive exclusion.
    pub aggressive_dirs: Vec<String>,
    /// Lock files, bundles, binaries, media and repository plumbing.
    pub excluded_files: Vec<String>,
    /// Markers that flag generated files (compared upper-cased).
    pub generated_markers: Vec<String>,
    /// Root entries that identify a code project for the `auto` preset.
    pub project_markers: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

const SENSITIVE_NAMES: &[&str] = &[
    // environment files
    ".env",
    ".env.*",
    "*.env",
    ".envrc",
    // generic credential files
    "credentials",
    "credentials.*",
    "*credential*",
    "secrets",
    "secrets.*",
    "*secret*",
    "*.secret",
    "*.secrets",
    ".netrc",
    ".npmrc",
    ".pypirc",
    ".pgpass",
    ".git-credentials",
    "*api_key*",
    "*apikey*",
    "*api-key*",
    "*access_key*",
    "*secret_key*",
    "*.token",
    // ssh and tls material
    "id_rsa",
    "id_rsa.*",
    "id_dsa",
    "id_dsa.*",
    "id_ecdsa",
    "id_ecdsa.*",
    "id_ed25519",
    "id_ed25519.*",
    "*.pem",
    "*.key",
    "*.crt",
    "*.cer",
    "*.p12",
    "*.pfx",
    "*.jks",
    "*.keystore",
    "*.kdbx",
    "known_hosts",
    "authorized_keys",
    "private*.pem",
    "private*.key",
    "*_private_key*",
    ".ssh/**",
    ".gnupg/**",
    // aws
    "aws_credentials",
    "*.aws",
    "aws-exports.js",
    ".aws/**",
    // gcp
    "*-credentials.json",
    "service-account*.json",
    "gcp-*.json",
    "google-*.json",
    // azure
    "azure*.json",
    ".azure/**",
    // databases and orchestration
    "database.yml",
    "database.json",
    "*_database_url*",
    "*-secret.yaml",
    "*-secret.yml",
    "kubeconfig",
    ".kube/**",
    ".docker/config.json",
    // terraform and vault
    "*.tfvars",
    "terraform.tfstate",
    "terraform.tfstate.*",
    "*vault*.yml",
    "*vault*.yaml",
    // passwords and sessions
    "passwd",
    "shadow",
    "htpasswd",
    ".htpasswd",
    "passwords.*",
    "*.session",
    "auth.json",
    "auth.yaml",
    // shell history
    ".*_history",
];

const SENSITIVE_CONTENT: &[&str] = &[
    r#"(?i)(api[_-]?key|apikey)\s*[=:]\s*["']?[\w\-]{20,}"#,
    r#"(?i)(secret[_-]?key|secretkey)\s*[=:]\s*["']?[\w\-]{20,}"#,
    r#"(?i)(access[_-]?key|accesskey)\s*[=:]\s*["']?[\w\-]{20,}"#,
    r#"(?i)(auth[_-]?token|authtoken)\s*[=:]\s*["']?[\w\-]{20,}"#,
    r#"(?i)password\s*[=:]\s*["']?[^\s"']{8,}"#,
    r#"(?i)(aws[_-]?access[_-]?key[_-]?id)\s*[=:]\s*["']?[A-Z0-9]{20}"#,
    r#"(?i)(aws[_-]?secret[_-]?access[_-]?key)\s*[=:]\s*["']?[\w/+=]{40}"#,
    r"-----BEGIN\s+(RSA\s+|EC\s+|OPENSSH\s+)?PRIVATE\s+KEY-----",
    r"-----BEGIN\s+CERTIFICATE-----",
    r"(?i)bearer\s+[a-zA-Z0-9\-_]+\.[a-zA-Z0-9\-_]+",
    r"ghp_[a-zA-Z0-9]{36}",
    r"sk-[a-zA-Z0-9]{48}",
    r"sk-ant-[a-zA-Z0-9\-]{90,}",
];

const STANDARD_DIRS: &[&str] = &[
    // version control
    ".git",
    ".svn",
    ".hg",
    ".bzr",
    // dependencies
    "node_modules",
    "bower_components",
    "jspm_packages",
    "vendor",
    "vendors",
    "Pods",
    ".cocoapods",
    "Carthage",
    ".bundle",
    // python environments and caches
    "venv",
    ".venv",
    "env",
    ".env",
    "virtualenv",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".ruff_cache",
    "*.egg-info",
    ".eggs",
    ".tox",
    ".nox",
    // build tool state
    ".gradle",
    ".mvn",
    // editors and IDEs
    ".idea",
    ".vscode",
    ".vs",
    ".eclipse",
    ".settings",
    ".atom",
    "*.xcworkspace",
    "*.xcodeproj",
    // caches
    ".cache",
    ".parcel-cache",
    ".next",
    ".nuxt",
    ".turbo",
    ".webpack",
    // infrastructure tooling
    ".terraform",
    ".docker",
    ".vagrant",
    ".serverless",
];

const AGGRESSIVE_DIRS: &[&str] = &[
    // build output
    "dist",
    "build",
    "_build",
    ".build",
    "target",
    "out",
    "output",
    "classes",
    "bin",
    "obj",
    "release",
    "debug",
    "packages",
    // caches
    "cache",
    "caches",
    // coverage and test artifacts
    "coverage",
    ".coverage",
    "htmlcov",
    ".nyc_output",
    "__snapshots__",
    // generated sites
    "_site",
    "site",
    ".docusaurus",
    "public",
    // logs and temp
    "logs",
    "log",
    "tmp",
    "temp",
    ".tmp",
];

const EXCLUDED_FILES: &[&str] = &[
    // lock files
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Pipfile.lock",
    "poetry.lock",
    "uv.lock",
    "Cargo.lock",
    "Gemfile.lock",
    "composer.lock",
    "pubspec.lock",
    "packages.lock.json",
    "go.sum",
    // minified and bundled
    "*.min.js",
    "*.min.css",
    "*.bundle.js",
    "*.chunk.js",
    "*.map",
    // compiled objects
    "*.pyc",
    "*.pyo",
    "*.pyd",
    "*.so",
    "*.dylib",
    "*.dll",
    "*.class",
    "*.jar",
    "*.war",
    "*.exe",
    "*.bin",
    "*.out",
    "*.o",
    "*.obj",
    "*.a",
    "*.lib",
    "*.wasm",
    // archives
    "*.zip",
    "*.tar",
    "*.gz",
    "*.tgz",
    "*.bz2",
    "*.xz",
    "*.7z",
    "*.rar",
    "*.iso",
    "*.dmg",
    // images
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.bmp",
    "*.ico",
    "*.svg",
    "*.webp",
    "*.tiff",
    "*.psd",
    "*.heic",
    // audio and video
    "*.mp3",
    "*.mp4",
    "*.wav",
    "*.flac",
    "*.ogg",
    "*.m4a",
    "*.avi",
    "*.mov",
    "*.mkv",
    "*.webm",
    // fonts
    "*.ttf",
    "*.otf",
    "*.woff",
    "*.woff2",
    "*.eot",
    // databases
    "*.db",
    "*.sqlite",
    "*.sqlite3",
    "*.mdb",
    // documents that are usually exported artifacts
    "*.pdf",
    // editor leftovers
    "*~",
    "*.swp",
    "*.swo",
    "*.bak",
    ".DS_Store",
    "Thumbs.db",
    // repository plumbing
    ".gitignore",
    ".gitattributes",
    ".gitmodules",
    ".dockerignore",
    ".npmignore",
    ".editorconfig",
    ".prettierignore",
    ".knowledgeignore",
    "Makefile",
    "CMakeLists.txt",
    "Dockerfile",
    "docker-compose*.yml",
    "docker-compose*.yaml",
    ".travis.yml",
    ".gitlab-ci.yml",
    "Jenkinsfile",
    "azure-pipelines.yml",
    ".pre-commit-config.yaml",
];

const GENERATED_MARKERS: &[&str] = &[
    "DO NOT EDIT",
    "AUTO-GENERATED",
    "AUTOGENERATED",
    "GENERATED BY",
    "THIS FILE IS GENERATED",
    "CODE GENERATED BY",
    "DO NOT MODIFY",
    "@GENERATED",
    "<AUTO-GENERATED>",
];

const PROJECT_MARKERS: &[&str] = &[
    "package.json",
    "pyproject.toml",
    "setup.py",
    "Cargo.toml",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "Gemfile",
    "composer.json",
];

impl RuleSet {
    /// The default tables.
    pub fn builtin() -> Self {
        Self {
            sensitive_names: owned(SENSITIVE_NAMES),
            sensitive_content: owned(SENSITIVE_CONTENT),
            standard_dirs: owned(STANDARD_DIRS),
            aggressive_dirs: owned(AGGRESSIVE_DIRS),
            excluded_files: owned(EXCLUDED_FILES),
            generated_markers: owned(GENERATED_MARKERS),
            project_markers: owned(PROJECT_MARKERS),
        }
    }

    /// A rule set with no exclusions at all, for building custom tables.
    pub fn empty() -> Self {
        Self {
            sensitive_names: Vec::new(),
            sensitive_content: Vec::new(),
            standard_dirs: Vec::new(),
            aggressive_dirs: Vec::new(),
            excluded_files: Vec::new(),
            generated_markers: Vec::new(),
            project_markers: Vec::new(),
        }
    }

    /// Whether a root directory listing contains a project marker.
    pub fn is_code_project<'a>(&self, root_entries: impl IntoIterator<Item = &'a str>) -> bool {
        root_entries.into_iter().any(|name| {
            self.project_markers
                .iter()
                .any(|m| m.eq_ignore_ascii_case(name))
        })
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::builtin()
    }
}
