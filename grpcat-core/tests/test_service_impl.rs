use interop_service::TestService;
use interop_service::pb::{
    Payload, SimpleRequest, SimpleResponse, StreamingInputCallRequest,
    StreamingInputCallResponse, StreamingOutputCallRequest, StreamingOutputCallResponse,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::{Code, Request, Response, Status, Streaming};

// Magic request metadata understood by the test server: "fail-early" and
// "fail-late" carry a numeric status code to fail with before/after the
// response payload; "reply-with-headers" entries ("name: value") are echoed
// into the response headers.
pub const METADATA_FAIL_EARLY: &str = "fail-early";
pub const METADATA_FAIL_LATE: &str = "fail-late";
pub const METADATA_REPLY_HEADERS: &str = "reply-with-headers";

pub struct TestServiceImpl;

struct CallBehavior {
    fail_early: Option<Status>,
    fail_late: Option<Status>,
    headers: MetadataMap,
}

fn process_metadata(metadata: &MetadataMap) -> CallBehavior {
    let code_for = |name: &str| {
        metadata
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i32>().ok())
            .map(|code| Status::new(Code::from(code), "fail"))
    };

    let mut headers = MetadataMap::new();
    for value in metadata.get_all(METADATA_REPLY_HEADERS).iter() {
        if let Ok(text) = value.to_str()
            && let Some((name, value)) = text.split_once(':')
        {
            headers.append(
                name.trim()
                    .parse::<tonic::metadata::MetadataKey<tonic::metadata::Ascii>>()
                    .unwrap(),
                value.trim().parse().unwrap(),
            );
        }
    }

    CallBehavior {
        fail_early: code_for(METADATA_FAIL_EARLY),
        fail_late: code_for(METADATA_FAIL_LATE),
        headers,
    }
}

fn sized_payload(size: i32) -> Payload {
    let body = (0..size).map(|i| i as u8).collect();
    Payload { body }
}

type ResponseStream = ReceiverStream<Result<StreamingOutputCallResponse, Status>>;

#[tonic::async_trait]
impl TestService for TestServiceImpl {
    type StreamingOutputCallStream = ResponseStream;
    type FullDuplexCallStream = ResponseStream;
    type HalfDuplexCallStream = ResponseStream;

    async fn empty_call(
        &self,
        req: Request<()>,
    ) -> Result<Response<()>, Status> {
        let behavior = process_metadata(req.metadata());
        if let Some(status) = behavior.fail_early.or(behavior.fail_late) {
            return Err(status);
        }
        let mut response = Response::new(<()>::default());
        *response.metadata_mut() = behavior.headers;
        Ok(response)
    }

    async fn unary_call(
        &self,
        req: Request<SimpleRequest>,
    ) -> Result<Response<SimpleResponse>, Status> {
        let behavior = process_metadata(req.metadata());
        if let Some(status) = behavior.fail_early.or(behavior.fail_late) {
            return Err(status);
        }
        let mut response = Response::new(SimpleResponse {
            payload: req.into_inner().payload,
        });
        *response.metadata_mut() = behavior.headers;
        Ok(response)
    }

    async fn streaming_output_call(
        &self,
        req: Request<StreamingOutputCallRequest>,
    ) -> Result<Response<Self::StreamingOutputCallStream>, Status> {
        let behavior = process_metadata(req.metadata());
        if let Some(status) = behavior.fail_early {
            return Err(status);
        }

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for params in req.into_inner().response_parameters {
                let response = StreamingOutputCallResponse {
                    payload: Some(sized_payload(params.size)),
                };
                if tx.send(Ok(response)).await.is_err() {
                    return;
                }
            }
            if let Some(status) = behavior.fail_late {
                let _ = tx.send(Err(status)).await;
            }
        });

        let mut response = Response::new(ReceiverStream::new(rx));
        *response.metadata_mut() = behavior.headers;
        Ok(response)
    }

    async fn streaming_input_call(
        &self,
        req: Request<Streaming<StreamingInputCallRequest>>,
    ) -> Result<Response<StreamingInputCallResponse>, Status> {
        let behavior = process_metadata(req.metadata());
        if let Some(status) = behavior.fail_early {
            return Err(status);
        }

        let mut stream = req.into_inner();
        let mut aggregated = 0i32;
        while let Some(message) = stream.message().await? {
            if let Some(payload) = message.payload {
                aggregated += payload.body.len() as i32;
            }
        }
        if let Some(status) = behavior.fail_late {
            return Err(status);
        }

        let mut response = Response::new(StreamingInputCallResponse {
            aggregated_payload_size: aggregated,
        });
        *response.metadata_mut() = behavior.headers;
        Ok(response)
    }

    async fn full_duplex_call(
        &self,
        req: Request<Streaming<StreamingOutputCallRequest>>,
    ) -> Result<Response<Self::FullDuplexCallStream>, Status> {
        let behavior = process_metadata(req.metadata());
        if let Some(status) = behavior.fail_early {
            return Err(status);
        }

        let (tx, rx) = mpsc::channel(4);
        let mut stream = req.into_inner();
        tokio::spawn(async move {
            loop {
                match stream.message().await {
                    Ok(Some(message)) => {
                        for params in message.response_parameters {
                            let response = StreamingOutputCallResponse {
                                payload: Some(sized_payload(params.size)),
                            };
                            if tx.send(Ok(response)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        return;
                    }
                }
            }
            if let Some(status) = behavior.fail_late {
                let _ = tx.send(Err(status)).await;
            }
        });

        let mut response = Response::new(ReceiverStream::new(rx));
        *response.metadata_mut() = behavior.headers;
        Ok(response)
    }

    async fn half_duplex_call(
        &self,
        req: Request<Streaming<StreamingOutputCallRequest>>,
    ) -> Result<Response<Self::HalfDuplexCallStream>, Status> {
        let behavior = process_metadata(req.metadata());
        if let Some(status) = behavior.fail_early {
            return Err(status);
        }

        let (tx, rx) = mpsc::channel(4);
        let mut stream = req.into_inner();
        tokio::spawn(async move {
            let mut buffered = Vec::new();
            loop {
                match stream.message().await {
                    Ok(Some(message)) => buffered.push(message),
                    Ok(None) => break,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        return;
                    }
                }
            }
            for message in buffered {
                let response = StreamingOutputCallResponse {
                    payload: message.payload,
                };
                if tx.send(Ok(response)).await.is_err() {
                    return;
                }
            }
            if let Some(status) = behavior.fail_late {
                let _ = tx.send(Err(status)).await;
            }
        });

        let mut response = Response::new(ReceiverStream::new(rx));
        *response.metadata_mut() = behavior.headers;
        Ok(response)
    }
}
