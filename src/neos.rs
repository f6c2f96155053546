//! Client for the NEOS server's XML-RPC interface.
//!
//! Only the calls the scheduler needs are covered: `ping`, `submitJob`,
//! `getJobStatus` and `getFinalResults`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::error::SolverError;
use crate::lp::LinearModel;
use crate::models::NeosConfig;

/// Anything that can take a model and hand back the raw solver listing.
#[async_trait]
pub trait SolverService: Send + Sync {
    async fn solve(&self, model: &LinearModel) -> Result<String, SolverError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub number: u64,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Done,
    Running,
    Waiting,
    UnknownJob,
    BadPassword,
    Other(String),
}

impl JobStatus {
    fn parse(status: &str) -> Self {
        match status.trim() {
            "Done" => JobStatus::Done,
            "Running" => JobStatus::Running,
            "Waiting" => JobStatus::Waiting,
            "Unknown Job" => JobStatus::UnknownJob,
            "Bad Password" => JobStatus::BadPassword,
            other => JobStatus::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i64),
    Str(String),
    Base64(String),
    Bool(bool),
    Double(f64),
}

enum Param<'a> {
    Str(&'a str),
    Int(u64),
}

pub struct NeosClient {
    client: reqwest::Client,
    config: NeosConfig,
    email: String,
}

impl NeosClient {
    pub fn new(config: &NeosConfig, email: &str) -> Result<Self, SolverError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            email: email.to_string(),
        })
    }

    pub async fn ping(&self) -> Result<String, SolverError> {
        let values = self.call("ping", &[]).await?;
        first_string(&values)
    }

    pub async fn submit_job(&self, document: &str) -> Result<JobHandle, SolverError> {
        let values = self.call("submitJob", &[Param::Str(document)]).await?;
        let (number, password) = match values.as_slice() {
            [Value::Int(number), Value::Str(password), ..] => (*number, password.clone()),
            _ => {
                return Err(SolverError::MalformedResponse(
                    "submitJob did not return (job number, password)".to_string(),
                ))
            }
        };

        if number <= 0 {
            return Err(SolverError::Rejected(password));
        }
        Ok(JobHandle {
            number: number as u64,
            password,
        })
    }

    pub async fn job_status(&self, job: &JobHandle) -> Result<JobStatus, SolverError> {
        let values = self
            .call(
                "getJobStatus",
                &[Param::Int(job.number), Param::Str(&job.password)],
            )
            .await?;
        Ok(JobStatus::parse(&first_string(&values)?))
    }

    /// Solver listing of a finished job.
    pub async fn final_results(&self, job: &JobHandle) -> Result<String, SolverError> {
        let values = self
            .call(
                "getFinalResults",
                &[Param::Int(job.number), Param::Str(&job.password)],
            )
            .await?;

        match values.first() {
            Some(Value::Base64(encoded)) => {
                let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(compact)
                    .map_err(|e| SolverError::MalformedResponse(format!("bad base64 results: {}", e)))?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Some(Value::Str(text)) => Ok(text.clone()),
            _ => Err(SolverError::MalformedResponse(
                "getFinalResults returned no listing".to_string(),
            )),
        }
    }

    /// Poll until the job is done or `max_wait_secs` has passed.
    pub async fn wait_for_completion(&self, job: &JobHandle) -> Result<(), SolverError> {
        let started = Instant::now();
        let max_wait = Duration::from_secs(self.config.max_wait_secs);
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);

        loop {
            match self.job_status(job).await? {
                JobStatus::Done => return Ok(()),
                JobStatus::Running | JobStatus::Waiting => {
                    debug!(job = job.number, "Job not finished yet");
                }
                JobStatus::UnknownJob => {
                    return Err(SolverError::Rejected(format!(
                        "job {} is unknown to the server",
                        job.number
                    )))
                }
                JobStatus::BadPassword => {
                    return Err(SolverError::Rejected(format!(
                        "password refused for job {}",
                        job.number
                    )))
                }
                JobStatus::Other(status) => {
                    warn!(job = job.number, %status, "Unexpected job status");
                }
            }

            if started.elapsed() >= max_wait {
                return Err(SolverError::Timeout {
                    job: job.number,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// NEOS job document for an LP-format model.
    pub fn job_document(&self, model: &LinearModel) -> String {
        format!(
            "<document>\n\
             <category>{}</category>\n\
             <solver>{}</solver>\n\
             <inputMethod>{}</inputMethod>\n\
             <email>{}</email>\n\
             <LP><![CDATA[{}]]></LP>\n\
             <options><![CDATA[set timelimit {}]]></options>\n\
             <comments><![CDATA[{}]]></comments>\n\
             </document>",
            escape(&self.config.category),
            escape(&self.config.solver),
            escape(&self.config.input_method),
            escape(&self.email),
            model.to_lp(),
            self.config.time_limit_secs,
            model.name,
        )
    }

    async fn call(&self, method: &str, params: &[Param<'_>]) -> Result<Vec<Value>, SolverError> {
        let body = method_call(method, params);
        let response = self
            .client
            .post(&self.config.url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        let text = response.text().await?;
        parse_response(&text)
    }
}

#[async_trait]
impl SolverService for NeosClient {
    async fn solve(&self, model: &LinearModel) -> Result<String, SolverError> {
        let document = self.job_document(model);
        let job = self.submit_job(&document).await?;
        info!(
            job = job.number,
            model = %model.name,
            variables = model.binaries().len(),
            constraints = model.constraints().len(),
            "Submitted job to NEOS"
        );

        self.wait_for_completion(&job).await?;
        let listing = self.final_results(&job).await?;
        info!(job = job.number, bytes = listing.len(), "Fetched NEOS results");
        Ok(listing)
    }
}

fn method_call(method: &str, params: &[Param<'_>]) -> String {
    let mut body = format!(
        "<?xml version=\"1.0\"?>\n<methodCall>\n<methodName>{}</methodName>\n<params>\n",
        method
    );
    for param in params {
        let value = match param {
            Param::Str(s) => format!("<string>{}</string>", escape(s)),
            Param::Int(n) => format!("<int>{}</int>", n),
        };
        body.push_str(&format!("<param><value>{}</value></param>\n", value));
    }
    body.push_str("</params>\n</methodCall>\n");
    body
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Scalars of a methodResponse in document order. A fault becomes
/// `SolverError::Rejected`.
fn parse_response(body: &str) -> Result<Vec<Value>, SolverError> {
    let document = Html::parse_document(body);

    if let Some(fault) = document.select(&selector("fault")).next() {
        let message = fault
            .select(&selector("string"))
            .next()
            .map(|s| s.text().collect::<String>())
            .unwrap_or_else(|| fault.text().collect::<String>());
        return Err(SolverError::Rejected(message.trim().to_string()));
    }

    if document.select(&selector("params")).next().is_none() {
        return Err(SolverError::MalformedResponse(
            "response has no params".to_string(),
        ));
    }

    let mut values = Vec::new();
    for value in document.select(&selector("params value")) {
        let typed = value.children().find_map(ElementRef::wrap);
        let parsed = match typed {
            None => Some(Value::Str(value.text().collect())),
            Some(inner) => scalar(inner)?,
        };
        values.extend(parsed);
    }
    Ok(values)
}

fn scalar(element: ElementRef) -> Result<Option<Value>, SolverError> {
    let text: String = element.text().collect();

    let value = match element.value().name() {
        "int" | "i4" | "i8" => Value::Int(
            text.trim()
                .parse()
                .map_err(|_| malformed("int", &text))?,
        ),
        "string" => Value::Str(text),
        "base64" => Value::Base64(text),
        "boolean" => Value::Bool(text.trim() == "1"),
        "double" => Value::Double(
            text.trim()
                .parse()
                .map_err(|_| malformed("double", &text))?,
        ),
        // arrays and structs: their nested values are visited on their own
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn malformed(kind: &str, text: &str) -> SolverError {
    SolverError::MalformedResponse(format!("bad {} value {:?}", kind, text.trim()))
}

fn first_string(values: &[Value]) -> Result<String, SolverError> {
    match values.first() {
        Some(Value::Str(s)) => Ok(s.clone()),
        other => Err(SolverError::MalformedResponse(format!(
            "expected a string, got {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lp::{Relation, Sense, Term};
    use base64::Engine as _;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn response(inner: &str) -> String {
        format!(
            "<?xml version='1.0'?>\n<methodResponse>\n<params>\n<param>\n{}\n</param>\n</params>\n</methodResponse>\n",
            inner
        )
    }

    fn fault(message: &str) -> String {
        format!(
            "<?xml version='1.0'?>\n<methodResponse>\n<fault>\n<value><struct>\n\
             <member><name>faultCode</name><value><int>1</int></value></member>\n\
             <member><name>faultString</name><value><string>{}</string></value></member>\n\
             </struct></value>\n</fault>\n</methodResponse>\n",
            message
        )
    }

    fn test_config(url: &str) -> NeosConfig {
        NeosConfig {
            url: url.to_string(),
            poll_interval_secs: 0,
            max_wait_secs: 30,
            ..NeosConfig::default()
        }
    }

    fn tiny_model() -> LinearModel {
        let mut model = LinearModel::new("tiny", Sense::Minimize);
        let x = model.add_binary("x_0_0");
        model.add_constraint("assign_0", vec![Term::new(1.0, &x)], Relation::Eq, 1.0);
        model
    }

    #[test]
    fn parses_submit_response() {
        let body = response(
            "<value><array><data>\n<value><int>1234567</int></value>\n\
             <value><string>AbCdEf</string></value>\n</data></array></value>",
        );
        let values = parse_response(&body).unwrap();
        assert_eq!(
            values,
            vec![Value::Int(1234567), Value::Str("AbCdEf".to_string())]
        );
    }

    #[test]
    fn untyped_values_are_strings_and_entities_decode() {
        let values = parse_response(&response("<value>a &lt;b&gt; &amp; c</value>")).unwrap();
        assert_eq!(values, vec![Value::Str("a <b> & c".to_string())]);
    }

    #[test]
    fn faults_are_rejections() {
        match parse_response(&fault("Error: invalid solver")) {
            Err(SolverError::Rejected(msg)) => assert_eq!(msg, "Error: invalid solver"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            parse_response("<html>gateway error</html>"),
            Err(SolverError::MalformedResponse(_))
        ));
    }

    #[test]
    fn method_call_escapes_strings() {
        let body = method_call("submitJob", &[Param::Str("a<b & c"), Param::Int(7)]);
        assert!(body.contains("<methodName>submitJob</methodName>"));
        assert!(body.contains("<string>a&lt;b &amp; c</string>"));
        assert!(body.contains("<int>7</int>"));
    }

    #[test]
    fn job_document_embeds_model_and_email() {
        let client = NeosClient::new(&test_config("http://localhost"), "planner@example.com")
            .unwrap();
        let doc = client.job_document(&tiny_model());
        assert!(doc.contains("<category>milp</category>"));
        assert!(doc.contains("<solver>CPLEX</solver>"));
        assert!(doc.contains("<inputMethod>LP</inputMethod>"));
        assert!(doc.contains("<email>planner@example.com</email>"));
        assert!(doc.contains("assign_0: x_0_0 = 1"));
        assert!(doc.contains("set timelimit 600"));
    }

    #[test]
    fn job_status_strings() {
        assert_eq!(JobStatus::parse("Done"), JobStatus::Done);
        assert_eq!(JobStatus::parse("Unknown Job"), JobStatus::UnknownJob);
        assert_eq!(
            JobStatus::parse("Paused"),
            JobStatus::Other("Paused".to_string())
        );
    }

    #[tokio::test]
    async fn solve_submits_polls_and_fetches() {
        let server = MockServer::start().await;
        let listing = "MIP - Integer optimal solution:  Objective =  0.0000000000e+00\n";
        let encoded = base64::engine::general_purpose::STANDARD.encode(listing);

        Mock::given(method("POST"))
            .and(body_string_contains("<methodName>submitJob</methodName>"))
            .respond_with(ResponseTemplate::new(200).set_body_string(response(
                "<value><array><data><value><int>42</int></value>\
                 <value><string>pw</string></value></data></array></value>",
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("<methodName>getJobStatus</methodName>"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(response("<value><string>Running</string></value>")),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("<methodName>getJobStatus</methodName>"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(response("<value><string>Done</string></value>")),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("<methodName>getFinalResults</methodName>"))
            .and(body_string_contains("<int>42</int>"))
            .respond_with(ResponseTemplate::new(200).set_body_string(response(&format!(
                "<value><base64>\n{}\n</base64></value>",
                encoded
            ))))
            .expect(1)
            .mount(&server)
            .await;

        let client = NeosClient::new(&test_config(&server.uri()), "planner@example.com").unwrap();
        let text = client.solve(&tiny_model()).await.unwrap();
        assert_eq!(text, listing);
    }

    #[tokio::test]
    async fn rejected_submission_surfaces_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(response(
                "<value><array><data><value><int>0</int></value>\
                 <value><string>Error: email address required</string></value></data></array></value>",
            )))
            .mount(&server)
            .await;

        let client = NeosClient::new(&test_config(&server.uri()), "planner@example.com").unwrap();
        match client.solve(&tiny_model()).await {
            Err(SolverError::Rejected(msg)) => assert!(msg.contains("email address required")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_wait() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(response("<value><string>Waiting</string></value>")),
            )
            .mount(&server)
            .await;

        let config = NeosConfig {
            max_wait_secs: 0,
            ..test_config(&server.uri())
        };
        let client = NeosClient::new(&config, "planner@example.com").unwrap();
        let job = JobHandle {
            number: 9,
            password: "pw".to_string(),
        };
        assert!(matches!(
            client.wait_for_completion(&job).await,
            Err(SolverError::Timeout { job: 9, .. })
        ));
    }

    #[tokio::test]
    async fn http_errors_mean_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = NeosClient::new(&test_config(&server.uri()), "planner@example.com").unwrap();
        assert!(matches!(
            client.ping().await,
            Err(SolverError::Unavailable(_))
        ));
    }
}
