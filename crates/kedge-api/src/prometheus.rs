//! Prometheus text exposition format.
//!
//! Renders published target statuses for scraping by a Prometheus server
//! or compatible agent.

use kedge_state::TargetStatus;

/// Render target statuses into Prometheus text format.
///
/// Every series carries a `target` label; metric values also carry
/// `metric`.
pub fn render_prometheus(statuses: &[TargetStatus]) -> String {
    let mut out = String::new();

    out.push_str("# HELP kedge_desired_replicas Replica count published on the last pass.\n");
    out.push_str("# TYPE kedge_desired_replicas gauge\n");
    for s in statuses {
        out.push_str(&format!(
            "kedge_desired_replicas{{target=\"{}\"}} {}\n",
            escape(&s.target_id),
            s.desired_replicas
        ));
    }

    out.push_str("# HELP kedge_active Whether any trigger reported activity (0/1).\n");
    out.push_str("# TYPE kedge_active gauge\n");
    for s in statuses {
        out.push_str(&format!(
            "kedge_active{{target=\"{}\"}} {}\n",
            escape(&s.target_id),
            u8::from(s.active)
        ));
    }

    out.push_str("# HELP kedge_paused Whether a pause annotation is in effect (0/1).\n");
    out.push_str("# TYPE kedge_paused gauge\n");
    for s in statuses {
        out.push_str(&format!(
            "kedge_paused{{target=\"{}\"}} {}\n",
            escape(&s.target_id),
            u8::from(s.paused_replicas.is_some())
        ));
    }

    out.push_str("# HELP kedge_trigger_errors Triggers with a failed call on the last pass.\n");
    out.push_str("# TYPE kedge_trigger_errors gauge\n");
    for s in statuses {
        let failed = s
            .triggers
            .iter()
            .filter(|t| t.error.is_some() || !t.metric_errors.is_empty())
            .count();
        out.push_str(&format!(
            "kedge_trigger_errors{{target=\"{}\"}} {}\n",
            escape(&s.target_id),
            failed
        ));
    }

    out.push_str("# HELP kedge_metric_value Last value reported by a trigger metric.\n");
    out.push_str("# TYPE kedge_metric_value gauge\n");
    for s in statuses {
        for m in &s.metrics {
            out.push_str(&format!(
                "kedge_metric_value{{target=\"{}\",metric=\"{}\"}} {}\n",
                escape(&s.target_id),
                escape(&m.name),
                m.value
            ));
        }
    }

    out
}

fn escape(label: &str) -> String {
    label
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
