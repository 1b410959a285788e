//! 输出解析函数

use super::types::{OutdatedPackage, PackageRecord};
use anyhow::{bail, Result};

/// 版本约束中可能出现的比较运算符
const VERSION_OPERATORS: [&str; 7] = ["==", ">=", "<=", ">", "<", "~=", "!="];

/// 清理终端输出中的 ANSI 转义序列和特殊字符
pub fn clean_terminal_output(input: &str) -> String {
    let mut result = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    while let Some(&next) = chars.peek() {
                        chars.next();
                        if next.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
            }
            c if c.is_control() && c != '\n' && c != '\t' => {}
            _ => result.push(c),
        }
    }

    result
}

/// 组装 pip 的包说明：没有运算符的版本号默认精确匹配
pub fn build_package_spec(name: &str, version: Option<&str>) -> String {
    match version.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) if VERSION_OPERATORS.iter().any(|op| v.contains(op)) => format!("{name}{v}"),
        Some(v) => format!("{name}=={v}"),
        None => name.to_string(),
    }
}

/// 解析 `pip list --format=json`，按名称排序（不区分大小写）
pub fn parse_pip_list_json(output: &str) -> Result<Vec<PackageRecord>> {
    let mut packages: Vec<PackageRecord> = serde_json::from_str(output.trim())?;
    packages.sort_by_key(|p| p.name.to_lowercase());
    Ok(packages)
}

/// 解析 `pip list --outdated --format=json`
pub fn parse_outdated_json(output: &str) -> Result<Vec<OutdatedPackage>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// 解析 `pip list` 的表格输出
///
/// ```text
/// Package    Version
/// ---------- -------
/// requests   2.31.0
/// ```
pub fn parse_pip_list_table(output: &str) -> Result<Vec<PackageRecord>> {
    let mut lines = output.lines().map(clean_terminal_output);

    // 跳过表头直到分隔线
    let mut found_separator = false;
    for line in lines.by_ref() {
        let trimmed = line.trim();
        if !trimmed.is_empty() && trimmed.chars().all(|c| c == '-' || c == ' ') {
            found_separator = true;
            break;
        }
    }
    if !found_separator {
        bail!("无法识别 pip list 输出格式");
    }

    let mut packages: Vec<PackageRecord> = lines
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let version = parts.next()?;
            Some(PackageRecord {
                name: name.to_string(),
                version: version.to_string(),
            })
        })
        .collect();
    packages.sort_by_key(|p| p.name.to_lowercase());
    Ok(packages)
}

/// 批量升级预览："a, b, c 以及另外 N 个"
pub fn format_preview(names: &[String], limit: usize) -> String {
    let shown: Vec<&str> = names.iter().take(limit).map(|s| s.as_str()).collect();
    let mut text = shown.join(", ");
    if names.len() > limit {
        text.push_str(&format!(" 以及另外 {} 个", names.len() - limit));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_version_defaults_to_exact_match() {
        assert_eq!(build_package_spec("requests", Some("1.2.3")), "requests==1.2.3");
    }

    #[test]
    fn operator_versions_pass_through() {
        assert_eq!(build_package_spec("requests", Some(">=1.0")), "requests>=1.0");
        assert_eq!(build_package_spec("numpy", Some("~=1.26")), "numpy~=1.26");
        assert_eq!(build_package_spec("flask", Some("!=2.0.0")), "flask!=2.0.0");
        assert_eq!(build_package_spec("rich", Some("<14")), "rich<14");
    }

    #[test]
    fn blank_version_is_ignored() {
        assert_eq!(build_package_spec("requests", Some("   ")), "requests");
        assert_eq!(build_package_spec("requests", None), "requests");
        assert_eq!(build_package_spec("requests", Some(" 2.0 ")), "requests==2.0");
    }

    #[test]
    fn strips_ansi_sequences() {
        assert_eq!(clean_terminal_output("\x1b[32mok\x1b[0m\x07"), "ok");
    }

    #[test]
    fn parses_json_listing_sorted() {
        let json = r#"[{"name": "Werkzeug", "version": "3.0.1"}, {"name": "anyio", "version": "4.2.0"}]"#;
        let packages = parse_pip_list_json(json).unwrap();
        assert_eq!(packages[0].name, "anyio");
        assert_eq!(packages[1].version, "3.0.1");
    }

    #[test]
    fn rejects_non_json_listing() {
        assert!(parse_pip_list_json("Package Version").is_err());
    }

    #[test]
    fn parses_table_listing() {
        let table = "Package    Version\n---------- -------\nrequests   2.31.0\npip        24.0\n";
        let packages = parse_pip_list_table(table).unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "pip");
        assert_eq!(packages[1].version, "2.31.0");
    }

    #[test]
    fn table_without_separator_is_an_error() {
        assert!(parse_pip_list_table("ERROR: something broke").is_err());
    }

    #[test]
    fn parses_outdated() {
        let json = r#"[{"name": "pip", "version": "23.0", "latest_version": "24.0", "latest_filetype": "wheel"}]"#;
        let outdated = parse_outdated_json(json).unwrap();
        assert_eq!(outdated[0].latest_version, "24.0");
        assert!(parse_outdated_json("  \n").unwrap().is_empty());
    }

    #[test]
    fn preview_elides_past_limit() {
        let names: Vec<String> = (0..13).map(|i| format!("pkg{i}")).collect();
        let preview = format_preview(&names, 10);
        assert!(preview.starts_with("pkg0, pkg1"));
        assert!(preview.contains("pkg9"));
        assert!(!preview.contains("pkg10"));
        assert!(preview.ends_with("以及另外 3 个"));
        assert_eq!(format_preview(&names[..2], 10), "pkg0, pkg1");
    }
}
