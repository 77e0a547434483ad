//! Post-serialization pass wrapping optional fields in Helm conditionals.
//! The template syntax has no node in the YAML object model, so this works
//! on the serialized text: whole-document gates for claims and ingresses,
//! and a surgical if/else around the claim reference inside a workload so a
//! disabled toggle falls back to ephemeral scratch storage.

fn indent_of(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Gate an entire storage-claim document behind its per-service, per-volume
/// enabled toggle.
pub fn gate_storage_claim(doc: &str, component: &str, volume: &str) -> String {
    format!(
        "{{{{ if .Values.{component}.persistence.{volume}.enabled }}}}\n{doc}{{{{- end -}}}}\n"
    )
}

/// Rewrite persistent-claim references in a workload document so each mount
/// renders as the claim when its toggle is enabled and as `emptyDir` when
/// it is not. The volume name is tracked from the preceding `name:` line,
/// the indentation from the document itself.
pub fn gate_workload_claims(doc: &str, component: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut volume = String::new();
    let mut claim_indent = String::new();

    for line in doc.lines() {
        if line.contains("name:") {
            if let Some((_, value)) = line.split_once(':') {
                volume = value.trim().to_string();
            }
            out.push(line.to_string());
        } else if line.contains("persistentVolumeClaim") {
            let indent = indent_of(line);
            claim_indent = indent.to_string();
            out.push(format!(
                "{indent}{{{{- if .Values.{component}.persistence.{volume}.enabled }}}}"
            ));
            out.push(line.to_string());
        } else if line.contains("claimName") {
            out.push(line.to_string());
            out.push(format!("{claim_indent}{{{{ else }}}}"));
            out.push(format!("{claim_indent}emptyDir: {{}}"));
            out.push(format!("{claim_indent}{{{{- end }}}}"));
        } else {
            out.push(line.to_string());
        }
    }
    out.join("\n") + "\n"
}

/// Gate an ingress document behind its enabled toggle and wrap the rendered
/// class field in a conditional testing its own value, so the class is only
/// applied when set.
pub fn gate_ingress(doc: &str, component: &str) -> String {
    let mut out = vec![format!("{{{{- if .Values.{component}.ingress.enabled -}}}}")];
    for line in doc.lines() {
        if line.contains("ingressClassName") {
            let indent = indent_of(line);
            let value = line.split_once(':').map(|(_, v)| v).unwrap_or_default();
            let condition = value
                .replace(['\'', '"'], "")
                .replace("{{", "")
                .replace("}}", "")
                .trim()
                .to_string();
            out.push(format!("{indent}{{{{- if {condition} }}}}"));
            out.push(line.to_string());
            out.push(format!("{indent}{{{{- end }}}}"));
        } else {
            out.push(line.to_string());
        }
    }
    out.push("{{- end -}}".to_string());
    out.join("\n") + "\n"
}
